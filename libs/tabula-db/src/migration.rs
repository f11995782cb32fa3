//! Schema mutations.
//!
//! A mutation is planned against the current snapshot, its DDL and schema
//! documents are written in one transaction, and only after that commits is
//! the replacement snapshot installed. A failed statement leaves both the
//! database and the installed snapshot untouched. Mutations are serialised
//! by the registry lock.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use sea_orm::{ConnectionTrait, Statement};
use tabula_security::AuthPermission;

use crate::connect::Db;
use crate::error::EngineError;
use crate::permission_cache;
use crate::schema::column::standard_columns;
use crate::schema::{
    ColumnInfo, DdlStatement, RelationDescriptor, SchemaRegistry, SchemaSnapshot, TableSchema, ddl,
    is_standard, normalize_identifier, store,
};

/// Raw mutation: documents to write, documents to delete, and the DDL that
/// brings the physical schema in line with them.
#[derive(Debug, Clone, Default)]
pub struct SchemaPlan {
    pub upsert: Vec<TableSchema>,
    pub remove: Vec<String>,
    pub ddl: Vec<DdlStatement>,
}

impl SchemaPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upsert.is_empty() && self.remove.is_empty() && self.ddl.is_empty()
    }
}

/// Copy-on-write view of a snapshot while a plan is being assembled.
struct Draft<'s> {
    base: &'s SchemaSnapshot,
    changed: BTreeMap<String, TableSchema>,
    removed: BTreeSet<String>,
    ddl: Vec<DdlStatement>,
}

impl<'s> Draft<'s> {
    fn new(base: &'s SchemaSnapshot) -> Self {
        Self {
            base,
            changed: BTreeMap::new(),
            removed: BTreeSet::new(),
            ddl: Vec::new(),
        }
    }

    fn get(&self, name: &str) -> Option<&TableSchema> {
        if self.removed.contains(name) {
            return None;
        }
        self.changed
            .get(name)
            .or_else(|| self.base.table(name).map(AsRef::as_ref))
    }

    fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn require(&self, name: &str) -> Result<&TableSchema, EngineError> {
        self.get(name).ok_or_else(|| EngineError::unknown_table(name))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableSchema, EngineError> {
        if self.removed.contains(name) {
            return Err(EngineError::unknown_table(name));
        }
        if !self.changed.contains_key(name) {
            let base = self
                .base
                .table(name)
                .ok_or_else(|| EngineError::unknown_table(name))?;
            self.changed.insert(name.to_owned(), TableSchema::clone(base));
        }
        self.changed
            .get_mut(name)
            .ok_or_else(|| EngineError::unknown_table(name))
    }

    fn insert(&mut self, table: TableSchema) {
        self.removed.remove(&table.name);
        self.changed.insert(table.name.clone(), table);
    }

    fn remove(&mut self, name: &str) {
        self.changed.remove(name);
        if self.base.contains(name) {
            self.removed.insert(name.to_owned());
        }
    }

    fn names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self
            .base
            .names()
            .filter(|n| !self.removed.contains(*n))
            .map(str::to_owned)
            .collect();
        names.extend(self.changed.keys().cloned());
        names.into_iter().collect()
    }

    fn drop_column(&mut self, table: &str, column: &str) -> Result<(), EngineError> {
        let t = self.table_mut(table)?;
        let Some(pos) = t.columns.iter().position(|c| c.name == column) else {
            return Err(EngineError::query(format!("table {table} has no column {column}")));
        };
        let col = t.columns.remove(pos);
        self.ddl.extend(ddl::drop_column(table, &col));
        Ok(())
    }

    fn into_plan(self) -> SchemaPlan {
        SchemaPlan {
            upsert: self.changed.into_values().collect(),
            remove: self.removed.into_iter().collect(),
            ddl: self.ddl,
        }
    }
}

/// Check a declared default against the column type and store it in the
/// form the column reads back.
fn normalize_default(col: &mut ColumnInfo) -> Result<(), EngineError> {
    if col.default_value.is_none() {
        return Ok(());
    }
    if col.is_foreign() {
        return Err(EngineError::query(format!(
            "foreign key column {} cannot have a default",
            col.name
        )));
    }
    col.default_value = col
        .typed_default()?
        .map(|v| serde_json::to_value(&v))
        .transpose()?;
    Ok(())
}

fn plan_create_table(draft: &mut Draft<'_>, mut table: TableSchema) -> Result<(), EngineError> {
    let name = normalize_identifier(&table.name)?;
    if draft.contains(&name) {
        return Err(EngineError::conflicting(format!("table {name} already exists")));
    }

    let mut columns = standard_columns();
    let mut seen: BTreeSet<String> = columns.iter().map(|c| c.name.clone()).collect();
    for mut col in std::mem::take(&mut table.columns) {
        if col.is_standard() {
            continue;
        }
        col.name = normalize_identifier(&col.name)?;
        normalize_default(&mut col)?;
        if !seen.insert(col.name.clone()) {
            return Err(EngineError::conflicting(format!(
                "column {} is declared twice on {name}",
                col.name
            )));
        }
        if let Some(fk) = &col.foreign_key
            && fk.table != name
            && !draft.contains(&fk.table)
        {
            return Err(EngineError::unknown_table(&fk.table));
        }
        columns.push(col);
    }

    table.name = name;
    table.columns = columns;
    let relations = std::mem::take(&mut table.relations);
    draft.ddl.extend(ddl::create_table(&table)?);
    draft.insert(table);

    for rel in relations {
        plan_add_relation(draft, rel)?;
    }
    Ok(())
}

fn plan_add_column(draft: &mut Draft<'_>, table: &str, mut col: ColumnInfo) -> Result<(), EngineError> {
    col.name = normalize_identifier(&col.name)?;
    if is_standard(&col.name) {
        return Err(EngineError::conflicting(format!("{} is a standard column", col.name)));
    }
    normalize_default(&mut col)?;
    if let Some(fk) = &col.foreign_key
        && !draft.contains(&fk.table)
    {
        return Err(EngineError::unknown_table(&fk.table));
    }

    let t = draft.table_mut(table)?;
    if t.has_column(&col.name) {
        return Err(EngineError::conflicting(format!(
            "column {table}.{} already exists",
            col.name
        )));
    }
    let stmts = ddl::add_column(table, &col)?;
    t.columns.push(col);
    draft.ddl.extend(stmts);
    Ok(())
}

fn plan_rename_column(draft: &mut Draft<'_>, table: &str, from: &str, to: &str) -> Result<(), EngineError> {
    let to = normalize_identifier(to)?;
    let t = draft.require(table)?;
    let col = t
        .column(from)
        .ok_or_else(|| EngineError::query(format!("table {table} has no column {from}")))?;
    if from == to {
        return Ok(());
    }
    if col.is_standard() || col.is_foreign() {
        return Err(EngineError::conflicting(format!(
            "column {table}.{from} is managed by the engine"
        )));
    }
    if t.has_column(&to) {
        return Err(EngineError::conflicting(format!("column {table}.{to} already exists")));
    }

    let stmts = ddl::rename_column(table, col, &to);
    if let Some(col) = draft.table_mut(table)?.column_mut(from) {
        col.name.clone_from(&to);
    }
    draft.ddl.extend(stmts);
    Ok(())
}

fn plan_drop_column(draft: &mut Draft<'_>, table: &str, column: &str) -> Result<(), EngineError> {
    let col = draft
        .require(table)?
        .column(column)
        .ok_or_else(|| EngineError::query(format!("table {table} has no column {column}")))?;
    if col.is_standard() || col.is_foreign() {
        return Err(EngineError::conflicting(format!(
            "column {table}.{column} is managed by the engine"
        )));
    }
    draft.drop_column(table, column)
}

fn plan_add_relation(draft: &mut Draft<'_>, rel: RelationDescriptor) -> Result<(), EngineError> {
    let rel = rel.normalized();
    let rel = RelationDescriptor {
        subject_name: normalize_identifier(&rel.subject_name)?,
        object_name: normalize_identifier(&rel.object_name)?,
        ..rel
    };
    for side in [&rel.subject, &rel.object] {
        if !draft.contains(side) {
            return Err(EngineError::unknown_table(side));
        }
    }
    let hash = rel.content_hash();
    if draft.require(&rel.subject)?.has_relation(hash) {
        return Ok(());
    }

    if rel.kind.is_plural() {
        if rel.subject_name == rel.object_name {
            return Err(EngineError::conflicting(format!(
                "relation {rel} uses {} for both sides",
                rel.subject_name
            )));
        }
        let join = TableSchema::join_table(&rel);
        if draft.contains(&join.name) {
            return Err(EngineError::conflicting(format!(
                "join table {} already exists",
                join.name
            )));
        }
        draft.ddl.extend(ddl::create_table(&join)?);
        draft.insert(join);
    } else {
        let subject = draft.table_mut(&rel.subject)?;
        if subject.has_column(&rel.object_name) {
            return Err(EngineError::conflicting(format!(
                "column {}.{} already exists",
                rel.subject, rel.object_name
            )));
        }
        let col = ColumnInfo::foreign(&rel.object_name, &rel.object, true);
        let stmts = ddl::add_column(&rel.subject, &col)?;
        subject.columns.push(col);
        draft.ddl.extend(stmts);
    }

    draft.table_mut(&rel.object)?.add_relation(rel.clone());
    let subject = rel.subject.clone();
    draft.table_mut(&subject)?.add_relation(rel);
    Ok(())
}

/// Remove whatever physically backs `rel`: the join table for plural kinds,
/// the foreign-key column on the subject otherwise.
fn teardown(draft: &mut Draft<'_>, rel: &RelationDescriptor) -> Result<(), EngineError> {
    if rel.kind.is_plural() {
        let join = rel.join_table_name();
        if draft.contains(&join) {
            draft.ddl.push(ddl::drop_table(&join));
            draft.remove(&join);
        }
    } else if draft
        .get(&rel.subject)
        .is_some_and(|t| t.has_column(&rel.object_name))
    {
        draft.drop_column(&rel.subject, &rel.object_name)?;
    }
    Ok(())
}

fn forget_relation(draft: &mut Draft<'_>, hash: u64) -> Result<(), EngineError> {
    for name in draft.names() {
        if draft.get(&name).is_some_and(|t| t.has_relation(hash)) {
            draft.table_mut(&name)?.remove_relation(hash);
        }
    }
    Ok(())
}

fn plan_remove_relation(draft: &mut Draft<'_>, rel: RelationDescriptor) -> Result<(), EngineError> {
    let rel = rel.normalized();
    let hash = rel.content_hash();
    if !draft.require(&rel.subject)?.has_relation(hash) {
        return Err(EngineError::query(format!("no relation {rel}")));
    }
    teardown(draft, &rel)?;
    forget_relation(draft, hash)
}

fn plan_drop_table(draft: &mut Draft<'_>, name: &str) -> Result<(), EngineError> {
    if draft.require(name)?.is_join_table {
        return Err(EngineError::conflicting(format!(
            "{name} backs a relation; remove the relation instead"
        )));
    }

    let mut seen = BTreeSet::new();
    let mut relations = Vec::new();
    for other in draft.names() {
        if let Some(t) = draft.get(&other) {
            for rel in t.relations.iter().filter(|r| r.touches(name)) {
                if seen.insert(rel.content_hash()) {
                    relations.push(rel.clone());
                }
            }
        }
    }

    for rel in &relations {
        if rel.kind.is_plural() || (rel.object == name && rel.subject != name) {
            teardown(draft, rel)?;
        }
    }

    // Foreign keys declared as plain columns rather than through a relation.
    for other in draft.names() {
        if other == name {
            continue;
        }
        let dangling: Vec<String> = draft
            .get(&other)
            .map(|t| {
                t.foreign_keys()
                    .filter(|c| c.foreign_key.as_ref().is_some_and(|fk| fk.table == name))
                    .map(|c| c.name.clone())
                    .collect()
            })
            .unwrap_or_default();
        for column in dangling {
            draft.drop_column(&other, &column)?;
        }
    }

    for rel in &relations {
        forget_relation(draft, rel.content_hash())?;
    }
    draft.ddl.push(ddl::drop_table(name));
    draft.remove(name);
    Ok(())
}

fn next_snapshot(current: &SchemaSnapshot, plan: &SchemaPlan) -> Result<SchemaSnapshot, EngineError> {
    let replaced: BTreeSet<&str> = plan
        .upsert
        .iter()
        .map(|t| t.name.as_str())
        .chain(plan.remove.iter().map(String::as_str))
        .collect();
    let kept = current
        .tables()
        .filter(|t| !replaced.contains(t.name.as_str()))
        .map(|t| TableSchema::clone(t));
    SchemaSnapshot::build(current.version() + 1, kept.chain(plan.upsert.iter().cloned()))
}

/// Applies schema changes to the database and the registry together.
#[derive(Debug, Clone)]
pub struct SchemaMutator {
    db: Db,
    registry: Arc<SchemaRegistry>,
    default_permission: AuthPermission,
}

impl SchemaMutator {
    #[must_use]
    pub fn new(db: Db, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            db,
            registry,
            default_permission: AuthPermission::DEFAULT,
        }
    }

    /// Mask given to tables built with [`Self::new_table`].
    #[must_use]
    pub fn with_default_permission(mut self, permission: AuthPermission) -> Self {
        self.default_permission = permission;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Blank table carrying the configured default permission.
    #[must_use]
    pub fn new_table(&self, name: impl Into<String>) -> TableSchema {
        TableSchema::new(name)
            .with_permission(self.default_permission)
            .with_default_permission(self.default_permission)
    }

    /// Register and create a table. Standard columns are added if missing and
    /// declared relations are materialised.
    ///
    /// # Errors
    /// [`EngineError::ConflictingSchema`] if the table exists,
    /// [`EngineError::QueryConstruction`] for bad names,
    /// [`EngineError::Execution`] if the DDL fails.
    pub async fn create_table(&self, table: TableSchema) -> Result<Arc<SchemaSnapshot>, EngineError> {
        self.mutate("create_table", move |d| plan_create_table(d, table))
            .await
    }

    /// Existing rows take the column default. Backends that cannot backfill,
    /// SQLite among them, refuse a required column without one.
    ///
    /// # Errors
    /// [`EngineError::ConflictingSchema`] for duplicate or standard names,
    /// [`EngineError::QueryConstruction`] for a default that does not fit the
    /// column type, [`EngineError::Execution`] if the DDL fails.
    pub async fn add_column(&self, table: &str, column: ColumnInfo) -> Result<Arc<SchemaSnapshot>, EngineError> {
        self.mutate("add_column", move |d| plan_add_column(d, table, column))
            .await
    }

    /// Renaming a column to its current name changes nothing.
    ///
    /// # Errors
    /// [`EngineError::QueryConstruction`] if `from` does not exist,
    /// [`EngineError::ConflictingSchema`] if `to` exists or `from` is managed
    /// by the engine.
    pub async fn rename_column(
        &self,
        table: &str,
        from: &str,
        to: &str,
    ) -> Result<Arc<SchemaSnapshot>, EngineError> {
        self.mutate("rename_column", move |d| plan_rename_column(d, table, from, to))
            .await
    }

    /// # Errors
    /// [`EngineError::QueryConstruction`] if the column does not exist,
    /// [`EngineError::ConflictingSchema`] if it is managed by the engine.
    pub async fn drop_column(&self, table: &str, column: &str) -> Result<Arc<SchemaSnapshot>, EngineError> {
        self.mutate("drop_column", move |d| plan_drop_column(d, table, column))
            .await
    }

    /// Adding a relation that is already recorded changes nothing.
    ///
    /// # Errors
    /// [`EngineError::QueryConstruction`] for unknown tables,
    /// [`EngineError::ConflictingSchema`] if the backing column or join
    /// table already exists.
    pub async fn add_relation(&self, relation: RelationDescriptor) -> Result<Arc<SchemaSnapshot>, EngineError> {
        self.mutate("add_relation", move |d| plan_add_relation(d, relation))
            .await
    }

    /// # Errors
    /// [`EngineError::QueryConstruction`] if the relation is not recorded.
    pub async fn remove_relation(
        &self,
        relation: RelationDescriptor,
    ) -> Result<Arc<SchemaSnapshot>, EngineError> {
        self.mutate("remove_relation", move |d| plan_remove_relation(d, relation))
            .await
    }

    /// Drop a table and everything that hangs off it: foreign-key columns
    /// pointing at it, join tables of its plural relations, and every
    /// recorded copy of those relations.
    ///
    /// # Errors
    /// [`EngineError::QueryConstruction`] for unknown tables,
    /// [`EngineError::ConflictingSchema`] for join tables.
    pub async fn drop_table(&self, table: &str) -> Result<Arc<SchemaSnapshot>, EngineError> {
        self.mutate("drop_table", move |d| plan_drop_table(d, table))
            .await
    }

    /// Apply a caller-assembled plan as-is.
    ///
    /// # Errors
    /// [`EngineError::ConflictingSchema`] if the resulting schema is
    /// inconsistent, [`EngineError::Execution`] if a statement fails.
    pub async fn apply(&self, plan: SchemaPlan) -> Result<Arc<SchemaSnapshot>, EngineError> {
        let _guard = self.registry.lock().await;
        let current = self.registry.snapshot();
        self.commit("apply", &current, plan).await
    }

    async fn mutate<F>(&self, op: &'static str, plan: F) -> Result<Arc<SchemaSnapshot>, EngineError>
    where
        F: FnOnce(&mut Draft<'_>) -> Result<(), EngineError>,
    {
        let _guard = self.registry.lock().await;
        let current = self.registry.snapshot();
        let mut draft = Draft::new(&current);
        plan(&mut draft)?;
        let plan = draft.into_plan();
        self.commit(op, &current, plan).await
    }

    async fn commit(
        &self,
        op: &'static str,
        current: &Arc<SchemaSnapshot>,
        plan: SchemaPlan,
    ) -> Result<Arc<SchemaSnapshot>, EngineError> {
        if plan.is_empty() {
            tracing::debug!(op, "schema unchanged");
            return Ok(Arc::clone(current));
        }
        let next = next_snapshot(current, &plan)?;

        let backend = self.db.connection().get_database_backend();
        let statements: Vec<Statement> = plan.ddl.iter().map(|s| s.build(backend)).collect();
        let SchemaPlan { upsert, remove, .. } = plan;
        let statement_count = statements.len();

        self.db
            .transaction(move |tx| {
                Box::pin(async move {
                    for stmt in statements {
                        tx.execute(stmt).await?;
                    }
                    for table in &upsert {
                        store::upsert(tx, table).await?;
                    }
                    for name in &remove {
                        store::remove(tx, name).await?;
                    }
                    // Join tables may have come or gone with their grants.
                    permission_cache::bump_epoch(tx).await?;
                    Ok::<(), EngineError>(())
                })
            })
            .await
            .inspect_err(|e| tracing::warn!(op, error = %e, "schema change rolled back"))?;

        let installed = self.registry.install(next);
        tracing::info!(
            op,
            version = installed.version(),
            statements = statement_count,
            "schema updated"
        );
        Ok(installed)
    }
}
