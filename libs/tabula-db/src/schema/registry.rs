//! Process-wide schema state.
//!
//! Readers call [`SchemaRegistry::snapshot`] once per request and keep the
//! returned `Arc` for the rest of it. Writers build a complete replacement
//! snapshot and install it in one atomic store, so a reader sees either the
//! old schema or the new one, never a mix.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use sea_orm::ConnectionTrait;
use tokio::sync::{Mutex, MutexGuard};

use super::store;
use super::table::TableSchema;
use crate::error::EngineError;
use crate::permission_cache;

/// Immutable, versioned view of every registered table.
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    version: u64,
    tables: BTreeMap<String, Arc<TableSchema>>,
}

impl SchemaSnapshot {
    /// Assemble and validate a snapshot.
    ///
    /// Every relation must point at registered tables. A relation recorded
    /// on one endpoint is adopted by the other.
    ///
    /// # Errors
    /// Returns [`EngineError::ConflictingSchema`] for duplicate table names,
    /// relations to unknown tables, or relations recorded on a table they do
    /// not touch.
    pub fn build(
        version: u64,
        tables: impl IntoIterator<Item = TableSchema>,
    ) -> Result<Self, EngineError> {
        let mut by_name: BTreeMap<String, TableSchema> = BTreeMap::new();
        for table in tables {
            let name = table.name.clone();
            if by_name.insert(name.clone(), table).is_some() {
                return Err(EngineError::conflicting(format!("table {name} is declared twice")));
            }
        }

        let mut adopted = Vec::new();
        for table in by_name.values() {
            for rel in &table.relations {
                if !rel.touches(&table.name) {
                    return Err(EngineError::conflicting(format!(
                        "table {} records relation {rel} it is not part of",
                        table.name
                    )));
                }
                let other = rel.other_side(&table.name);
                if !by_name.contains_key(other) {
                    return Err(EngineError::conflicting(format!(
                        "relation {rel} points at unknown table {other}"
                    )));
                }
                if other != table.name {
                    adopted.push((other.to_owned(), rel.clone()));
                }
            }
        }
        for (name, rel) in adopted {
            if let Some(t) = by_name.get_mut(&name) {
                t.add_relation(rel);
            }
        }

        Ok(Self {
            version,
            tables: by_name
                .into_iter()
                .map(|(name, table)| (name, Arc::new(table)))
                .collect(),
        })
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Arc<TableSchema>> {
        self.tables.get(name)
    }

    /// Like [`Self::table`] but fails for unknown names.
    ///
    /// # Errors
    /// Returns [`EngineError::QueryConstruction`] when `name` is not registered.
    pub fn require(&self, name: &str) -> Result<&Arc<TableSchema>, EngineError> {
        self.tables
            .get(name)
            .ok_or_else(|| EngineError::unknown_table(name))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableSchema>> {
        self.tables.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Holder of the current snapshot plus the lock that serialises writers.
pub struct SchemaRegistry {
    current: ArcSwap<SchemaSnapshot>,
    mutation_lock: Mutex<()>,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.current.load();
        f.debug_struct("SchemaRegistry")
            .field("version", &snap.version)
            .field("tables", &snap.tables.len())
            .finish()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new(SchemaSnapshot::default())
    }
}

impl SchemaRegistry {
    #[must_use]
    pub fn new(snapshot: SchemaSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
            mutation_lock: Mutex::new(()),
        }
    }

    /// Create the bookkeeping tables if needed and build the startup snapshot
    /// from `schema_table`.
    ///
    /// # Errors
    /// Returns [`EngineError::ConflictingSchema`] if a stored document is
    /// unreadable or inconsistent, [`EngineError::Execution`] on store errors.
    pub async fn load<C: ConnectionTrait>(conn: &C) -> Result<Self, EngineError> {
        store::ensure(conn).await?;
        permission_cache::ensure_epoch(conn).await?;
        let tables = store::load_all(conn).await?;
        let snapshot = SchemaSnapshot::build(1, tables)?;
        tracing::info!(tables = snapshot.len(), "schema loaded");
        Ok(Self::new(snapshot))
    }

    /// Re-read the store and install the result.
    ///
    /// # Errors
    /// Same as [`Self::load`]. On error the current snapshot stays installed.
    pub async fn reload<C: ConnectionTrait>(&self, conn: &C) -> Result<Arc<SchemaSnapshot>, EngineError> {
        let _guard = self.lock().await;
        let tables = store::load_all(conn).await?;
        let next = SchemaSnapshot::build(self.snapshot().version() + 1, tables)?;
        Ok(self.install(next))
    }

    /// The snapshot a request should work against.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        self.current.load_full()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutation_lock.lock().await
    }

    pub(crate) fn install(&self, next: SchemaSnapshot) -> Arc<SchemaSnapshot> {
        let next = Arc::new(next);
        self.current.store(Arc::clone(&next));
        next
    }
}
