//! Relations between tables.

use std::fmt;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

/// Relation kinds. Unknown kinds fail deserialization, which surfaces as a
/// schema load error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    HasOne,
    BelongsTo,
    HasMany,
    HasManyAndBelongsToMany,
}

impl RelationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RelationKind::HasOne => "has_one",
            RelationKind::BelongsTo => "belongs_to",
            RelationKind::HasMany => "has_many",
            RelationKind::HasManyAndBelongsToMany => "has_many_and_belongs_to_many",
        }
    }

    /// Backed by a synthetic join table rather than a column.
    #[must_use]
    pub fn is_plural(self) -> bool {
        matches!(
            self,
            RelationKind::HasMany | RelationKind::HasManyAndBelongsToMany
        )
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "has_one" => Ok(RelationKind::HasOne),
            "belongs_to" => Ok(RelationKind::BelongsTo),
            "has_many" => Ok(RelationKind::HasMany),
            "has_many_and_belongs_to_many" => Ok(RelationKind::HasManyAndBelongsToMany),
            other => Err(format!("unknown relation kind '{other}'")),
        }
    }
}

/// `subject <kind> object`, plus the column names used on each side.
///
/// `subject_name` / `object_name` default to `<table>_id` (lower-cased).
/// For plural kinds they name the two columns of the join table; for
/// `has_one` / `belongs_to`, `object_name` is the foreign-key column on the
/// subject table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub subject: String,
    pub object: String,
    #[serde(rename = "relation")]
    pub kind: RelationKind,
    #[serde(default)]
    pub subject_name: String,
    #[serde(default)]
    pub object_name: String,
}

fn default_name(table: &str) -> String {
    format!("{}_id", table.to_lowercase())
}

impl RelationDescriptor {
    #[must_use]
    pub fn new(subject: impl Into<String>, kind: RelationKind, object: impl Into<String>) -> Self {
        let subject = subject.into();
        let object = object.into();
        Self {
            subject_name: default_name(&subject),
            object_name: default_name(&object),
            subject,
            object,
            kind,
        }
    }

    #[must_use]
    pub fn with_names(mut self, subject_name: impl Into<String>, object_name: impl Into<String>) -> Self {
        self.subject_name = subject_name.into();
        self.object_name = object_name.into();
        self
    }

    /// Fill in names left empty by a stored document.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.subject_name.is_empty() {
            self.subject_name = default_name(&self.subject);
        }
        if self.object_name.is_empty() {
            self.object_name = default_name(&self.object);
        }
        self
    }

    /// `Subject_SubjectName_has_Object_ObjectName`. Derived from the descriptor
    /// alone so it can be recomputed when the relation is torn down.
    #[must_use]
    pub fn join_table_name(&self) -> String {
        format!(
            "{}_{}_has_{}_{}",
            self.subject, self.subject_name, self.object, self.object_name
        )
    }

    /// Join fragment driven from the subject table.
    #[must_use]
    pub fn join_string(&self) -> String {
        let (s, o) = (&self.subject, &self.object);
        if self.kind.is_plural() {
            format!(
                " {} j1 on j1.{} = {s}.id join {o} on j1.{} = {o}.id ",
                self.join_table_name(),
                self.subject_name,
                self.object_name
            )
        } else {
            format!(" {o} on {s}.{} = {o}.id ", self.object_name)
        }
    }

    /// Join fragment driven from the object table.
    #[must_use]
    pub fn reverse_join_string(&self) -> String {
        let (s, o) = (&self.subject, &self.object);
        if self.kind.is_plural() {
            format!(
                " {} j1 on j1.{} = {o}.id join {s} on j1.{} = {s}.id ",
                self.join_table_name(),
                self.object_name,
                self.subject_name
            )
        } else {
            format!(" {s} on {s}.{} = {o}.id ", self.object_name)
        }
    }

    /// Identity string; two descriptors with the same key are the same relation.
    #[must_use]
    pub fn hash_key(&self) -> String {
        format!(
            "[{}][{}][{}][{}][{}]",
            self.subject_name, self.kind, self.object_name, self.subject, self.object
        )
    }

    #[must_use]
    pub fn content_hash(&self) -> u64 {
        xxh3_64(self.hash_key().as_bytes())
    }

    #[must_use]
    pub fn touches(&self, table: &str) -> bool {
        self.subject == table || self.object == table
    }

    /// The endpoint that is not `table`, or `table` itself for self relations.
    #[must_use]
    pub fn other_side<'a>(&'a self, table: &'a str) -> &'a str {
        if self.subject == table {
            &self.object
        } else {
            &self.subject
        }
    }
}

impl fmt::Display for RelationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.kind, self.object)
    }
}
