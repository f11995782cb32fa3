use std::sync::Arc;

use sea_orm::sea_query::{Alias, Expr, Order, Query, SelectStatement};
use sea_orm::{ConnectionTrait, DatabaseTransaction};
use tabula_security::{CallerContext, Capability, ReferenceId};

use super::lookup::ForeignKeys;
use super::{Page, ResourceEngine};
use crate::error::EngineError;
use crate::row::{PeekRow, Row};
use crate::schema::TableSchema;
use crate::schema::column::{DELETED_AT, ID, REFERENCE_ID};

/// Rows fetched per statement while filling a page.
const SCAN_BATCH: u64 = 256;

fn live_rows(table: &TableSchema) -> SelectStatement {
    Query::select()
        .columns(table.columns.iter().map(|c| Alias::new(c.name.as_str())))
        .from(Alias::new(table.name.as_str()))
        .and_where(Expr::col(Alias::new(DELETED_AT)).is_null())
        .order_by(Alias::new(ID), Order::Asc)
        .to_owned()
}

async fn fetch<C: ConnectionTrait>(
    conn: &C,
    table: &Arc<TableSchema>,
    stmt: &SelectStatement,
) -> Result<Vec<Row>, EngineError> {
    let backend = conn.get_database_backend();
    conn.query_all(backend.build(stmt))
        .await?
        .iter()
        .map(|raw| Row::decode(table, raw))
        .collect()
}

/// Live rows with an internal id above `after`, at most `batch` of them.
pub(super) async fn select_rows<C: ConnectionTrait>(
    conn: &C,
    table: &Arc<TableSchema>,
    after: Option<i64>,
    batch: Option<u64>,
) -> Result<Vec<Row>, EngineError> {
    let mut stmt = live_rows(table);
    if let Some(after) = after {
        stmt.and_where(Expr::col(Alias::new(ID)).gt(after));
    }
    if let Some(batch) = batch {
        stmt.limit(batch);
    }
    fetch(conn, table, &stmt).await
}

pub(super) async fn select_by_reference<C: ConnectionTrait>(
    conn: &C,
    table: &Arc<TableSchema>,
    reference: ReferenceId,
) -> Result<Option<Row>, EngineError> {
    if reference.is_null() {
        return Ok(None);
    }
    let mut stmt = live_rows(table);
    stmt.and_where(Expr::col(Alias::new(REFERENCE_ID)).eq(reference.to_vec()));
    Ok(fetch(conn, table, &stmt).await?.into_iter().next())
}

/// The live row `reference`, or `NotFound`.
pub(super) async fn load<C: ConnectionTrait>(
    conn: &C,
    table: &Arc<TableSchema>,
    reference: ReferenceId,
) -> Result<Row, EngineError> {
    select_by_reference(conn, table, reference)
        .await?
        .ok_or_else(|| EngineError::not_found(&table.name, reference))
}

impl ResourceEngine {
    /// Every live row of `table` the caller may read, with foreign keys
    /// resolved. A foreign key that no longer resolves fails the whole scan.
    ///
    /// # Errors
    /// [`EngineError::ForeignKeyIntegrity`] for dangling foreign keys,
    /// [`EngineError::QueryConstruction`] for unknown tables.
    pub async fn find_all(
        &self,
        table: &str,
        caller: &CallerContext,
        tx: &DatabaseTransaction,
    ) -> Result<Vec<Row>, EngineError> {
        self.find_rows(table, None, caller, tx).await
    }

    /// [`Self::find_all`] over one window of the rows the caller may read,
    /// ordered by creation. Rows the caller cannot read do not count
    /// towards `offset` or `limit`.
    ///
    /// # Errors
    /// Same as [`Self::find_all`].
    pub async fn find_page(
        &self,
        table: &str,
        page: Page,
        caller: &CallerContext,
        tx: &DatabaseTransaction,
    ) -> Result<Vec<Row>, EngineError> {
        self.find_rows(table, Some(page), caller, tx).await
    }

    async fn find_rows(
        &self,
        table: &str,
        page: Option<Page>,
        caller: &CallerContext,
        tx: &DatabaseTransaction,
    ) -> Result<Vec<Row>, EngineError> {
        let snapshot = self.registry.snapshot();
        let t = snapshot.require(table)?;
        if page.is_some_and(|p| p.limit == 0) {
            return Ok(Vec::new());
        }
        let scope = self.scope(tx).await?;

        // A page scans in batches until it is full; a full listing reads
        // everything in one statement.
        let batch = page.map(|p| p.limit.max(SCAN_BATCH));
        let mut skip = page.map_or(0, |p| p.offset);
        let mut remaining = page.map(|p| p.limit);
        let mut after = None;
        let mut scanned = 0_usize;
        let mut fks = ForeignKeys::default();
        let mut out = Vec::new();

        'scan: loop {
            let rows = select_rows(tx, t, after, batch).await?;
            let exhausted = batch.is_none_or(|b| u64::try_from(rows.len()).is_ok_and(|n| n < b));
            scanned += rows.len();
            for mut row in rows {
                after = Some(row.internal_id());
                let perm = self.permission_for(scope, &row).await?;
                if !caller.can(&perm, Capability::Read, self.admin_group) {
                    continue;
                }
                if skip > 0 {
                    skip -= 1;
                    continue;
                }
                fks.resolve(tx, &mut row).await?;
                out.push(row);
                if let Some(left) = remaining.as_mut() {
                    *left -= 1;
                    if *left == 0 {
                        break 'scan;
                    }
                }
            }
            if exhausted {
                break;
            }
        }
        tracing::debug!(table, scanned, visible = out.len(), "rows listed");
        Ok(out)
    }

    /// # Errors
    /// [`EngineError::NotFound`] for missing or deleted rows,
    /// [`EngineError::Unauthorized`] if the caller may not read it,
    /// [`EngineError::ForeignKeyIntegrity`] for dangling foreign keys.
    pub async fn find_one(
        &self,
        table: &str,
        reference: ReferenceId,
        caller: &CallerContext,
        tx: &DatabaseTransaction,
    ) -> Result<Row, EngineError> {
        let snapshot = self.registry.snapshot();
        let t = snapshot.require(table)?;

        let scope = self.scope(tx).await?;
        let mut row = load(tx, t, reference).await?;
        let perm = self.permission_for(scope, &row).await?;
        self.check(caller, &perm, Capability::Read, &t.name)?;
        ForeignKeys::default().resolve(tx, &mut row).await?;
        Ok(row)
    }

    /// Confirm a row exists without returning its contents. Passes with
    /// either peek or read permission.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] or [`EngineError::Unauthorized`].
    pub async fn peek(
        &self,
        table: &str,
        reference: ReferenceId,
        caller: &CallerContext,
        tx: &DatabaseTransaction,
    ) -> Result<PeekRow, EngineError> {
        let snapshot = self.registry.snapshot();
        let t = snapshot.require(table)?;

        let scope = self.scope(tx).await?;
        let row = load(tx, t, reference).await?;
        let perm = self.permission_for(scope, &row).await?;
        if !caller.can(&perm, Capability::Peek, self.admin_group)
            && !caller.can(&perm, Capability::Read, self.admin_group)
        {
            return Err(EngineError::unauthorized(&t.name, Capability::Peek));
        }
        Ok(PeekRow {
            table: t.name.clone(),
            reference_id: row.reference_id(),
        })
    }
}
