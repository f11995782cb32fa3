#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Schema-driven resource engine.
//!
//! Tables and relations are declared at runtime ([`schema`]) and changed
//! through [`SchemaMutator`]. [`ResourceEngine`] turns the registered schema
//! into create/read/update/delete calls that enforce row permissions, hide
//! internal ids behind reference ids and soft-delete rows.

pub mod config;
pub mod connect;
pub mod engine;
pub mod error;
pub mod migration;
pub mod permission_cache;
pub mod row;
pub mod schema;
pub mod value;

pub use config::{DatabaseConfig, ENV_PREFIX, EngineConfig, PermissionCacheConfig};
pub use connect::{ConnectOpts, Db, connect_db};
pub use engine::{Operation, Outcome, Page, ResourceEngine, ResourceRequest};
pub use error::EngineError;
pub use migration::{SchemaMutator, SchemaPlan};
pub use permission_cache::PermissionCache;
pub use row::{Attributes, PeekRow, Row};
pub use schema::{
    ColumnInfo, ColumnType, RelationDescriptor, RelationKind, SchemaRegistry, SchemaSnapshot,
    TableSchema,
};
pub use value::Value;

// Transaction handle taken by every engine call.
pub use sea_orm::DatabaseTransaction;
