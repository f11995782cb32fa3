//! DDL builders. Each statement carries a single alter option so it renders
//! on every backend, SQLite included.
//!
//! Unique user columns are backed by a named index, `{table}_{column}_key`,
//! rather than an inline constraint. SQLite refuses to add or drop a column
//! with an inline UNIQUE, but handles an index on either side of the alter.

use sea_orm::sea_query::{
    Alias, ColumnDef, Index, IndexCreateStatement, IndexDropStatement, Table,
    TableAlterStatement, TableCreateStatement, TableDropStatement,
};
use sea_orm::{DbBackend, Statement};

use super::column::{ColumnInfo, ColumnType, ID};
use super::table::TableSchema;
use crate::error::EngineError;

/// One physical schema change.
#[derive(Debug, Clone)]
pub enum DdlStatement {
    CreateTable(TableCreateStatement),
    AlterTable(TableAlterStatement),
    DropTable(TableDropStatement),
    CreateIndex(IndexCreateStatement),
    DropIndex(IndexDropStatement),
}

impl DdlStatement {
    /// Render for `backend`.
    #[must_use]
    pub fn build(&self, backend: DbBackend) -> Statement {
        match self {
            DdlStatement::CreateTable(s) => backend.build(s),
            DdlStatement::AlterTable(s) => backend.build(s),
            DdlStatement::DropTable(s) => backend.build(s),
            DdlStatement::CreateIndex(s) => backend.build(s),
            DdlStatement::DropIndex(s) => backend.build(s),
        }
    }
}

fn index_name(table: &str, column: &str) -> String {
    format!("{table}_{column}_key")
}

fn unique_index(table: &str, column: &str) -> DdlStatement {
    DdlStatement::CreateIndex(
        Index::create()
            .name(index_name(table, column))
            .table(Alias::new(table))
            .col(Alias::new(column))
            .unique()
            .to_owned(),
    )
}

fn drop_unique_index(table: &str, column: &str) -> DdlStatement {
    DdlStatement::DropIndex(
        Index::drop()
            .name(index_name(table, column))
            .table(Alias::new(table))
            .if_exists()
            .to_owned(),
    )
}

/// Standard columns keep their constraints inline; user columns never do.
fn indexed(col: &ColumnInfo) -> bool {
    col.unique && !col.is_standard()
}

fn column_def(col: &ColumnInfo) -> Result<ColumnDef, EngineError> {
    let mut def = ColumnDef::new(Alias::new(col.name.as_str()));
    if col.name == ID {
        def.big_integer().not_null().auto_increment().primary_key();
        return Ok(def);
    }
    match col.column_type {
        ColumnType::Integer => def.big_integer(),
        ColumnType::Float => def.double(),
        ColumnType::Boolean => def.boolean(),
        ColumnType::Text => def.text(),
        ColumnType::Binary | ColumnType::Reference => def.blob(),
        ColumnType::Timestamp => def.timestamp_with_time_zone(),
    };
    if col.nullable {
        def.null();
    } else {
        def.not_null();
    }
    if col.unique && col.is_standard() {
        def.unique_key();
    }
    if let Some(value) = col.typed_default()? {
        def.default(col.column_type.bind(&value));
    }
    Ok(def)
}

/// `CREATE TABLE` plus the unique indexes of its user columns. A table that
/// already exists fails the statement.
///
/// # Errors
/// [`EngineError::QueryConstruction`] if a column default does not fit its
/// type.
pub fn create_table(schema: &TableSchema) -> Result<Vec<DdlStatement>, EngineError> {
    let name = schema.name.as_str();
    let mut stmt = Table::create();
    stmt.table(Alias::new(name));
    for col in &schema.columns {
        stmt.col(column_def(col)?);
    }
    let mut out = vec![DdlStatement::CreateTable(stmt)];
    out.extend(
        schema
            .columns
            .iter()
            .filter(|c| indexed(c))
            .map(|c| unique_index(name, &c.name)),
    );
    Ok(out)
}

/// # Errors
/// Same as [`create_table`].
pub fn add_column(table: &str, col: &ColumnInfo) -> Result<Vec<DdlStatement>, EngineError> {
    let mut out = vec![DdlStatement::AlterTable(
        Table::alter()
            .table(Alias::new(table))
            .add_column(column_def(col)?)
            .to_owned(),
    )];
    if indexed(col) {
        out.push(unique_index(table, &col.name));
    }
    Ok(out)
}

#[must_use]
pub fn drop_column(table: &str, col: &ColumnInfo) -> Vec<DdlStatement> {
    let mut out = Vec::with_capacity(2);
    if indexed(col) {
        out.push(drop_unique_index(table, &col.name));
    }
    out.push(DdlStatement::AlterTable(
        Table::alter()
            .table(Alias::new(table))
            .drop_column(Alias::new(col.name.as_str()))
            .to_owned(),
    ));
    out
}

/// Rename `col` to `to`, moving its unique index along with it.
#[must_use]
pub fn rename_column(table: &str, col: &ColumnInfo, to: &str) -> Vec<DdlStatement> {
    let rename = DdlStatement::AlterTable(
        Table::alter()
            .table(Alias::new(table))
            .rename_column(Alias::new(col.name.as_str()), Alias::new(to))
            .to_owned(),
    );
    if indexed(col) {
        vec![
            drop_unique_index(table, &col.name),
            rename,
            unique_index(table, to),
        ]
    } else {
        vec![rename]
    }
}

#[must_use]
pub fn drop_table(table: &str) -> DdlStatement {
    DdlStatement::DropTable(Table::drop().table(Alias::new(table)).to_owned())
}
