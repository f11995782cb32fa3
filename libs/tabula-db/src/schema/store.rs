//! Persisted schema documents, one JSON row per table in `schema_table`.

use chrono::Utc;
use sea_orm::sea_query::{Alias, ColumnDef, Expr, OnConflict, Order, Query, Table};
use sea_orm::ConnectionTrait;

use super::relation::RelationDescriptor;
use super::table::TableSchema;
use crate::error::EngineError;

pub const SCHEMA_TABLE: &str = "schema_table";

const TABLE_NAME: &str = "table_name";
const SCHEMA_JSON: &str = "schema_json";
const UPDATED_AT: &str = "updated_at";

/// Create `schema_table` if it does not exist yet.
pub async fn ensure<C: ConnectionTrait>(conn: &C) -> Result<(), EngineError> {
    let stmt = Table::create()
        .table(Alias::new(SCHEMA_TABLE))
        .if_not_exists()
        .col(
            ColumnDef::new(Alias::new("id"))
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(Alias::new(TABLE_NAME))
                .string_len(255)
                .not_null()
                .unique_key(),
        )
        .col(ColumnDef::new(Alias::new(SCHEMA_JSON)).text().not_null())
        .col(
            ColumnDef::new(Alias::new(UPDATED_AT))
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned();
    let backend = conn.get_database_backend();
    conn.execute(backend.build(&stmt)).await?;
    Ok(())
}

/// Read every stored table document. A document that does not parse, for
/// example one naming an unknown relation kind, fails the whole load.
pub async fn load_all<C: ConnectionTrait>(conn: &C) -> Result<Vec<TableSchema>, EngineError> {
    let stmt = Query::select()
        .columns([Alias::new(TABLE_NAME), Alias::new(SCHEMA_JSON)])
        .from(Alias::new(SCHEMA_TABLE))
        .order_by(Alias::new("id"), Order::Asc)
        .to_owned();
    let backend = conn.get_database_backend();
    let rows = conn.query_all(backend.build(&stmt)).await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row.try_get("", TABLE_NAME)?;
        let doc: String = row.try_get("", SCHEMA_JSON)?;
        let mut table: TableSchema = serde_json::from_str(&doc).map_err(|e| {
            EngineError::conflicting(format!("stored schema for {name} is invalid: {e}"))
        })?;
        if table.name != name {
            return Err(EngineError::conflicting(format!(
                "stored schema row {name} describes table {}",
                table.name
            )));
        }
        table.relations = table.relations.into_iter().map(RelationDescriptor::normalized).collect();
        out.push(table);
    }
    Ok(out)
}

pub async fn upsert<C: ConnectionTrait>(conn: &C, table: &TableSchema) -> Result<(), EngineError> {
    let doc = serde_json::to_string(table)?;
    let stmt = Query::insert()
        .into_table(Alias::new(SCHEMA_TABLE))
        .columns([
            Alias::new(TABLE_NAME),
            Alias::new(SCHEMA_JSON),
            Alias::new(UPDATED_AT),
        ])
        .values([
            Expr::value(table.name.clone()),
            Expr::value(doc),
            Expr::value(Utc::now()),
        ])?
        .on_conflict(
            OnConflict::column(Alias::new(TABLE_NAME))
                .update_columns([Alias::new(SCHEMA_JSON), Alias::new(UPDATED_AT)])
                .to_owned(),
        )
        .to_owned();
    let backend = conn.get_database_backend();
    conn.execute(backend.build(&stmt)).await?;
    Ok(())
}

pub async fn remove<C: ConnectionTrait>(conn: &C, name: &str) -> Result<(), EngineError> {
    let stmt = Query::delete()
        .from_table(Alias::new(SCHEMA_TABLE))
        .and_where(Expr::col(Alias::new(TABLE_NAME)).eq(name))
        .to_owned();
    let backend = conn.get_database_backend();
    conn.execute(backend.build(&stmt)).await?;
    Ok(())
}
