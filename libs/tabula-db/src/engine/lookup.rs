//! Reference id and internal id translation.

use std::collections::HashMap;

use sea_orm::ConnectionTrait;
use sea_orm::sea_query::{Alias, Expr, Query};
use tabula_security::ReferenceId;

use crate::error::EngineError;
use crate::row::Row;
use crate::schema::column::{DELETED_AT, ID, REFERENCE_ID};
use crate::value::Value;

/// Internal id of the live row `reference` in `table`.
pub(super) async fn id_for_reference<C: ConnectionTrait>(
    conn: &C,
    table: &str,
    reference: ReferenceId,
) -> Result<i64, EngineError> {
    if reference.is_null() {
        return Err(EngineError::not_found(table, reference));
    }
    let stmt = Query::select()
        .column(Alias::new(ID))
        .from(Alias::new(table))
        .and_where(Expr::col(Alias::new(REFERENCE_ID)).eq(reference.to_vec()))
        .and_where(Expr::col(Alias::new(DELETED_AT)).is_null())
        .to_owned();
    let backend = conn.get_database_backend();
    let row = conn
        .query_one(backend.build(&stmt))
        .await?
        .ok_or_else(|| EngineError::not_found(table, reference))?;
    Ok(row.try_get::<i64>("", ID)?)
}

/// Reference id of the live row with internal id `id`. A stored value that
/// is not a valid reference id reads as the null id.
pub(super) async fn reference_for_id<C: ConnectionTrait>(
    conn: &C,
    table: &str,
    id: i64,
) -> Result<ReferenceId, EngineError> {
    let stmt = Query::select()
        .column(Alias::new(REFERENCE_ID))
        .from(Alias::new(table))
        .and_where(Expr::col(Alias::new(ID)).eq(id))
        .and_where(Expr::col(Alias::new(DELETED_AT)).is_null())
        .to_owned();
    let backend = conn.get_database_backend();
    let row = conn
        .query_one(backend.build(&stmt))
        .await?
        .ok_or_else(|| EngineError::not_found(table, ReferenceId::NULL))?;
    let raw: Vec<u8> = row.try_get("", REFERENCE_ID)?;
    Ok(ReferenceId::lenient(&raw))
}

/// Rewrites foreign-key columns from internal ids to reference ids.
///
/// One lookup per distinct `(target, id)` per call, issued in order on the
/// caller's transaction.
#[derive(Debug, Default)]
pub(super) struct ForeignKeys {
    memo: HashMap<(String, i64), ReferenceId>,
}

impl ForeignKeys {
    pub(super) async fn resolve<C: ConnectionTrait>(
        &mut self,
        conn: &C,
        row: &mut Row,
    ) -> Result<(), EngineError> {
        let targets: Vec<(String, String)> = row
            .table()
            .foreign_keys()
            .filter_map(|c| c.foreign_key.as_ref().map(|fk| (c.name.clone(), fk.table.clone())))
            .collect();

        for (column, target) in targets {
            let Some(id) = row.get(&column).and_then(Value::as_i64) else {
                continue;
            };
            let key = (target, id);
            let reference = if let Some(r) = self.memo.get(&key) {
                *r
            } else {
                let r = reference_for_id(conn, &key.0, id).await.map_err(|e| {
                    if e.is_not_found() {
                        EngineError::dangling(row.table_name(), &column, &key.0, &id)
                    } else {
                        e
                    }
                })?;
                self.memo.insert(key, r);
                r
            };
            row.set(&column, Value::Reference(reference));
        }
        Ok(())
    }
}
