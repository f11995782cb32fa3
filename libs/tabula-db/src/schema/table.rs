use serde::{Deserialize, Serialize};
use tabula_security::{AuthPermission, GroupPermission, PermissionInstance, ReferenceId};

use super::column::{ColumnInfo, standard_columns};
use super::relation::{RelationDescriptor, RelationKind};

/// Table that holds user groups. A plural relation to it carries row grants.
pub const USERGROUP_TABLE: &str = "usergroup";

/// In-memory description of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub relations: Vec<RelationDescriptor>,
    /// Mask stamped on new rows.
    #[serde(default = "default_mask")]
    pub default_permission: AuthPermission,
    /// Table-level mask, checked by `create`.
    #[serde(default = "default_mask")]
    pub permission: AuthPermission,
    /// Table-level owner. Null unless configured.
    #[serde(default)]
    pub owner_id: ReferenceId,
    /// Table-level group grants.
    #[serde(default)]
    pub group_permissions: Vec<GroupPermission>,
    #[serde(default)]
    pub is_join_table: bool,
    #[serde(default)]
    pub is_hidden: bool,
}

fn default_mask() -> AuthPermission {
    AuthPermission::DEFAULT
}

impl TableSchema {
    /// A table with only the standard columns.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: standard_columns(),
            relations: Vec::new(),
            default_permission: AuthPermission::DEFAULT,
            permission: AuthPermission::DEFAULT,
            owner_id: ReferenceId::NULL,
            group_permissions: Vec::new(),
            is_join_table: false,
            is_hidden: false,
        }
    }

    #[must_use]
    pub fn with_column(mut self, column: ColumnInfo) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn with_relation(mut self, relation: RelationDescriptor) -> Self {
        self.add_relation(relation);
        self
    }

    #[must_use]
    pub fn with_permission(mut self, permission: AuthPermission) -> Self {
        self.permission = permission;
        self
    }

    #[must_use]
    pub fn with_default_permission(mut self, permission: AuthPermission) -> Self {
        self.default_permission = permission;
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner: ReferenceId) -> Self {
        self.owner_id = owner;
        self
    }

    /// Synthetic join table for a plural relation.
    #[must_use]
    pub fn join_table(relation: &RelationDescriptor) -> Self {
        let mut t = Self::new(relation.join_table_name())
            .with_column(ColumnInfo::foreign(&relation.subject_name, &relation.subject, false))
            .with_column(ColumnInfo::foreign(&relation.object_name, &relation.object, false));
        t.is_join_table = true;
        t.is_hidden = true;
        t
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub(crate) fn column_mut(&mut self, name: &str) -> Option<&mut ColumnInfo> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Columns returned to callers.
    pub fn api_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| c.include_in_api)
    }

    /// Columns callers may write.
    pub fn writable_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| !c.is_standard())
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| c.is_foreign())
    }

    /// Add a relation unless one with the same content hash is present.
    /// Returns whether the list changed.
    pub fn add_relation(&mut self, relation: RelationDescriptor) -> bool {
        let hash = relation.content_hash();
        if self.has_relation(hash) {
            return false;
        }
        self.relations.push(relation);
        true
    }

    /// Drop the relation with this content hash. Returns whether one was removed.
    pub fn remove_relation(&mut self, hash: u64) -> bool {
        let before = self.relations.len();
        self.relations.retain(|r| r.content_hash() != hash);
        before != self.relations.len()
    }

    #[must_use]
    pub fn has_relation(&self, hash: u64) -> bool {
        self.relations.iter().any(|r| r.content_hash() == hash)
    }

    #[must_use]
    pub fn relation(&self, hash: u64) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.content_hash() == hash)
    }

    /// Plural relation from this table to the usergroup table, if any.
    #[must_use]
    pub fn group_relation(&self) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| {
            r.subject == self.name && r.object == USERGROUP_TABLE && r.kind.is_plural()
        })
    }

    /// Relation that backs foreign-key column `column` on this table.
    #[must_use]
    pub fn relation_for_column(&self, column: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| {
            matches!(r.kind, RelationKind::BelongsTo | RelationKind::HasOne)
                && r.subject == self.name
                && r.object_name == column
        })
    }

    /// Permission data checked by `create`.
    #[must_use]
    pub fn table_permission(&self) -> PermissionInstance {
        PermissionInstance::new(self.owner_id, self.permission)
            .with_groups(self.group_permissions.clone())
    }
}
