use std::collections::BTreeMap;
use std::sync::Arc;

use sea_orm::QueryResult;
use serde::Serialize;
use tabula_security::{AuthPermission, ReferenceId};

use crate::error::EngineError;
use crate::schema::TableSchema;
use crate::schema::column::{ID, OWNER, PERMISSION, REFERENCE_ID};
use crate::value::Value;

/// Column values keyed by column name.
pub type Attributes = BTreeMap<String, Value>;

/// A row as it leaves the engine.
///
/// Serializes as a flat map of the API-visible columns. Foreign keys hold
/// reference ids; the internal id never appears.
#[derive(Debug, Clone, Serialize)]
pub struct Row {
    #[serde(skip)]
    table: Arc<TableSchema>,
    #[serde(skip)]
    internal_id: i64,
    #[serde(flatten)]
    values: Attributes,
}

impl Row {
    pub(crate) fn decode(table: &Arc<TableSchema>, raw: &QueryResult) -> Result<Self, EngineError> {
        let mut internal_id = None;
        let mut values = Attributes::new();
        for col in &table.columns {
            let value = (col.column_type.decoder())(raw, &col.name)?;
            if col.name == ID {
                internal_id = value.as_i64();
            } else if col.include_in_api {
                values.insert(col.name.clone(), value);
            }
        }
        let internal_id = internal_id
            .ok_or_else(|| EngineError::query(format!("{} row without an id", table.name)))?;
        Ok(Self {
            table: Arc::clone(table),
            internal_id,
            values,
        })
    }

    #[must_use]
    pub fn table(&self) -> &TableSchema {
        &self.table
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table.name
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    #[must_use]
    pub fn values(&self) -> &Attributes {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Attributes {
        self.values
    }

    #[must_use]
    pub fn reference_id(&self) -> ReferenceId {
        self.reference(REFERENCE_ID)
    }

    /// Owner, or the null id for rows created anonymously.
    #[must_use]
    pub fn owner_id(&self) -> ReferenceId {
        self.reference(OWNER)
    }

    #[must_use]
    pub fn permission(&self) -> AuthPermission {
        self.get(PERMISSION)
            .and_then(Value::as_i64)
            .map_or(AuthPermission::EMPTY, AuthPermission::from)
    }

    fn reference(&self, column: &str) -> ReferenceId {
        self.get(column)
            .and_then(Value::as_reference)
            .unwrap_or_default()
    }

    pub(crate) fn internal_id(&self) -> i64 {
        self.internal_id
    }

    pub(crate) fn set(&mut self, column: &str, value: Value) {
        self.values.insert(column.to_owned(), value);
    }
}

/// Summary returned by `peek`: enough to show the row exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeekRow {
    pub table: String,
    pub reference_id: ReferenceId,
}
