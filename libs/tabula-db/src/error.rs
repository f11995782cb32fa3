use sea_orm::DbErr;
use tabula_security::{Capability, PermissionDecodeError, ReferenceId, ReferenceIdError};

/// Errors surfaced by the schema layer and the resource engine.
///
/// The engine never retries and never swallows `NotFound` or `Unauthorized`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{table} row {reference_id} not found")]
    NotFound {
        table: String,
        reference_id: ReferenceId,
    },

    #[error("not allowed to {capability} on {table}")]
    Unauthorized {
        table: String,
        capability: Capability,
    },

    #[error("conflicting schema: {0}")]
    ConflictingSchema(String),

    #[error("malformed identifier: {0}")]
    MalformedIdentifier(#[from] ReferenceIdError),

    #[error("cannot build query: {0}")]
    QueryConstruction(String),

    #[error("execution failed: {0}")]
    Execution(#[from] DbErr),

    #[error("foreign key {table}.{column} -> {target}: {value} does not resolve")]
    ForeignKeyIntegrity {
        table: String,
        column: String,
        target: String,
        value: String,
    },
}

impl EngineError {
    #[must_use]
    pub fn not_found(table: impl Into<String>, reference_id: ReferenceId) -> Self {
        Self::NotFound {
            table: table.into(),
            reference_id,
        }
    }

    #[must_use]
    pub fn unauthorized(table: impl Into<String>, capability: Capability) -> Self {
        Self::Unauthorized {
            table: table.into(),
            capability,
        }
    }

    #[must_use]
    pub fn conflicting(message: impl Into<String>) -> Self {
        Self::ConflictingSchema(message.into())
    }

    #[must_use]
    pub fn query(message: impl Into<String>) -> Self {
        Self::QueryConstruction(message.into())
    }

    #[must_use]
    pub fn unknown_table(table: &str) -> Self {
        Self::QueryConstruction(format!("unknown table {table}"))
    }

    #[must_use]
    pub fn dangling(
        table: impl Into<String>,
        column: impl Into<String>,
        target: impl Into<String>,
        value: &impl std::fmt::Display,
    ) -> Self {
        Self::ForeignKeyIntegrity {
            table: table.into(),
            column: column.into(),
            target: target.into(),
            value: value.to_string(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    #[must_use]
    pub fn is_foreign_key_integrity(&self) -> bool {
        matches!(self, Self::ForeignKeyIntegrity { .. })
    }
}

impl From<sea_orm::sea_query::error::Error> for EngineError {
    fn from(e: sea_orm::sea_query::error::Error) -> Self {
        Self::QueryConstruction(e.to_string())
    }
}

impl From<PermissionDecodeError> for EngineError {
    fn from(e: PermissionDecodeError) -> Self {
        Self::ConflictingSchema(format!("stored permission is unreadable: {e}"))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::ConflictingSchema(format!("schema document is invalid: {e}"))
    }
}
