//! Table, column and relation metadata plus the versioned registry.

pub mod column;
pub mod ddl;
pub mod naming;
pub mod registry;
pub mod relation;
pub(crate) mod store;
pub mod table;

pub use column::{ColumnInfo, ColumnType, ForeignKey, STANDARD_COLUMNS, is_standard};
pub use ddl::DdlStatement;
pub use naming::normalize_identifier;
pub use registry::{SchemaRegistry, SchemaSnapshot};
pub use relation::{RelationDescriptor, RelationKind};
pub use store::SCHEMA_TABLE;
pub use table::{TableSchema, USERGROUP_TABLE};
