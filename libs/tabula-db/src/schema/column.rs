//! Column metadata and the per-type codec table.

use chrono::{DateTime, Utc};
use sea_orm::{DbErr, QueryResult};
use serde::{Deserialize, Serialize};
use tabula_security::ReferenceId;

use crate::error::EngineError;
use crate::value::Value;

pub const ID: &str = "id";
pub const REFERENCE_ID: &str = "reference_id";
pub const PERMISSION: &str = "permission";
pub const OWNER: &str = "user_account_id";
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const DELETED_AT: &str = "deleted_at";

/// Columns every table carries. Their values are engine-managed.
pub const STANDARD_COLUMNS: [&str; 7] = [
    ID,
    REFERENCE_ID,
    PERMISSION,
    OWNER,
    CREATED_AT,
    UPDATED_AT,
    DELETED_AT,
];

#[must_use]
pub fn is_standard(name: &str) -> bool {
    STANDARD_COLUMNS.contains(&name)
}

/// Storage type declared by the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    /// 16-byte reference id.
    Reference,
    Timestamp,
}

pub(crate) type DecodeFn = fn(&QueryResult, &str) -> Result<Value, DbErr>;

fn decode_integer(row: &QueryResult, col: &str) -> Result<Value, DbErr> {
    Ok(row.try_get::<Option<i64>>("", col)?.into())
}

fn decode_float(row: &QueryResult, col: &str) -> Result<Value, DbErr> {
    Ok(row.try_get::<Option<f64>>("", col)?.into())
}

fn decode_boolean(row: &QueryResult, col: &str) -> Result<Value, DbErr> {
    Ok(row.try_get::<Option<bool>>("", col)?.into())
}

fn decode_text(row: &QueryResult, col: &str) -> Result<Value, DbErr> {
    Ok(row.try_get::<Option<String>>("", col)?.into())
}

fn decode_binary(row: &QueryResult, col: &str) -> Result<Value, DbErr> {
    Ok(row.try_get::<Option<Vec<u8>>>("", col)?.into())
}

// Unreadable ids degrade to the null id.
fn decode_reference(row: &QueryResult, col: &str) -> Result<Value, DbErr> {
    let raw = row.try_get::<Option<Vec<u8>>>("", col)?;
    Ok(raw.map(|b| ReferenceId::lenient(&b)).into())
}

fn decode_timestamp(row: &QueryResult, col: &str) -> Result<Value, DbErr> {
    Ok(row.try_get::<Option<DateTime<Utc>>>("", col)?.into())
}

#[allow(clippy::cast_precision_loss)]
fn widen(v: i64) -> f64 {
    v as f64
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Text => "text",
            ColumnType::Binary => "binary",
            ColumnType::Reference => "reference",
            ColumnType::Timestamp => "timestamp",
        };
        f.write_str(s)
    }
}

impl ColumnType {
    pub(crate) fn decoder(self) -> DecodeFn {
        match self {
            ColumnType::Integer => decode_integer,
            ColumnType::Float => decode_float,
            ColumnType::Boolean => decode_boolean,
            ColumnType::Text => decode_text,
            ColumnType::Binary => decode_binary,
            ColumnType::Reference => decode_reference,
            ColumnType::Timestamp => decode_timestamp,
        }
    }

    /// Convert an incoming value to this type. Write-path conversions are
    /// strict: a malformed reference id fails the operation.
    ///
    /// # Errors
    /// [`EngineError::MalformedIdentifier`] for bad reference ids,
    /// [`EngineError::QueryConstruction`] for any other mismatch.
    pub fn coerce(self, column: &str, value: Value) -> Result<Value, EngineError> {
        let mismatch = |v: &Value| {
            EngineError::query(format!("column {column} is {self}, got {}", v.kind()))
        };
        let coerced = match (self, value) {
            (_, Value::Null) => Value::Null,
            (ColumnType::Integer, Value::Int(v)) => Value::Int(v),
            (ColumnType::Integer, Value::String(s)) => Value::Int(
                s.trim()
                    .parse()
                    .map_err(|_| EngineError::query(format!("column {column}: '{s}' is not an integer")))?,
            ),
            (ColumnType::Float, Value::Float(v)) => Value::Float(v),
            (ColumnType::Float, Value::Int(v)) => Value::Float(widen(v)),
            (ColumnType::Float, Value::String(s)) => Value::Float(
                s.trim()
                    .parse()
                    .map_err(|_| EngineError::query(format!("column {column}: '{s}' is not a number")))?,
            ),
            (ColumnType::Boolean, Value::Bool(b)) => Value::Bool(b),
            (ColumnType::Boolean, Value::Int(0)) => Value::Bool(false),
            (ColumnType::Boolean, Value::Int(1)) => Value::Bool(true),
            (ColumnType::Boolean, Value::String(s)) => match s.trim() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => return Err(EngineError::query(format!("column {column}: '{s}' is not a boolean"))),
            },
            (ColumnType::Text, Value::String(s)) => Value::String(s),
            (ColumnType::Binary, Value::Bytes(b)) => Value::Bytes(b),
            (ColumnType::Binary, Value::String(s)) => Value::Bytes(s.into_bytes()),
            (ColumnType::Reference, Value::Reference(r)) => Value::Reference(r),
            (ColumnType::Reference, Value::String(s)) => Value::Reference(ReferenceId::parse(&s)?),
            (ColumnType::Reference, Value::Bytes(b)) => Value::Reference(ReferenceId::from_bytes(&b)?),
            (ColumnType::Timestamp, Value::Timestamp(t)) => Value::Timestamp(t),
            (ColumnType::Timestamp, Value::String(s)) => Value::Timestamp(
                DateTime::parse_from_rfc3339(s.trim())
                    .map_err(|e| EngineError::query(format!("column {column}: {e}")))?
                    .with_timezone(&Utc),
            ),
            (_, other) => return Err(mismatch(&other)),
        };
        Ok(coerced)
    }

    /// Bind an already coerced value.
    pub(crate) fn bind(self, value: &Value) -> sea_orm::Value {
        match (self, value) {
            (_, Value::Int(v)) => sea_orm::Value::from(*v),
            (_, Value::Float(v)) => sea_orm::Value::from(*v),
            (_, Value::Bool(v)) => sea_orm::Value::from(*v),
            (_, Value::String(v)) => sea_orm::Value::from(v.clone()),
            (_, Value::Bytes(v)) => sea_orm::Value::from(v.clone()),
            (_, Value::Reference(v)) => sea_orm::Value::from(v.to_vec()),
            (_, Value::Timestamp(v)) => sea_orm::Value::from(*v),
            (ColumnType::Integer, Value::Null) => sea_orm::Value::from(None::<i64>),
            (ColumnType::Float, Value::Null) => sea_orm::Value::from(None::<f64>),
            (ColumnType::Boolean, Value::Null) => sea_orm::Value::from(None::<bool>),
            (ColumnType::Text, Value::Null) => sea_orm::Value::from(None::<String>),
            (ColumnType::Binary | ColumnType::Reference, Value::Null) => {
                sea_orm::Value::from(None::<Vec<u8>>)
            }
            (ColumnType::Timestamp, Value::Null) => sea_orm::Value::from(None::<DateTime<Utc>>),
        }
    }
}

/// Logical pointer from a column to another table's internal id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub foreign_key: Option<ForeignKey>,
    /// Value the database fills in when an insert leaves the column out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    /// Internal columns are never returned to callers.
    #[serde(default = "default_true")]
    pub include_in_api: bool,
}

fn default_true() -> bool {
    true
}

impl ColumnInfo {
    /// Required column of the given type.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            unique: false,
            foreign_key: None,
            default_value: None,
            include_in_api: true,
        }
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// The declared default coerced to the column type. A JSON null default
    /// counts as none.
    ///
    /// # Errors
    /// [`EngineError::QueryConstruction`] if the default does not fit the
    /// column type.
    pub fn typed_default(&self) -> Result<Option<Value>, EngineError> {
        let Some(raw) = &self.default_value else {
            return Ok(None);
        };
        let value = self.column_type.coerce(&self.name, Value::from_json(raw)?)?;
        Ok((!value.is_null()).then_some(value))
    }

    /// A required column the caller must supply on create.
    #[must_use]
    pub fn is_required(&self) -> bool {
        !self.nullable && self.default_value.is_none()
    }

    /// Relation-backed column holding another table's internal id.
    #[must_use]
    pub fn foreign(name: impl Into<String>, target: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::Integer,
            nullable,
            unique: false,
            foreign_key: Some(ForeignKey {
                table: target.into(),
                column: ID.to_owned(),
            }),
            default_value: None,
            include_in_api: true,
        }
    }

    #[must_use]
    pub fn is_foreign(&self) -> bool {
        self.foreign_key.is_some()
    }

    #[must_use]
    pub fn is_standard(&self) -> bool {
        is_standard(&self.name)
    }

    /// Type callers exchange for this column. Foreign keys travel as
    /// reference ids even though they are stored as integers.
    #[must_use]
    pub fn api_type(&self) -> ColumnType {
        if self.is_foreign() {
            ColumnType::Reference
        } else {
            self.column_type
        }
    }
}

/// The engine-managed columns, in declaration order.
#[must_use]
pub fn standard_columns() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo {
            include_in_api: false,
            ..ColumnInfo::new(ID, ColumnType::Integer)
        },
        ColumnInfo::new(REFERENCE_ID, ColumnType::Reference).unique(),
        ColumnInfo::new(PERMISSION, ColumnType::Integer),
        ColumnInfo::new(OWNER, ColumnType::Reference).nullable(),
        ColumnInfo::new(CREATED_AT, ColumnType::Timestamp),
        ColumnInfo::new(UPDATED_AT, ColumnType::Timestamp).nullable(),
        ColumnInfo::new(DELETED_AT, ColumnType::Timestamp).nullable(),
    ]
}
