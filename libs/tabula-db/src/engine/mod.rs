//! The resource engine: CRUD over registered tables.
//!
//! Each call translates reference ids, checks permissions, filters soft
//! deleted rows and resolves foreign keys. All statements run on the
//! transaction the caller passes in; the engine never commits or rolls it
//! back. Each call works against the schema snapshot current when it starts.

mod access;
mod lookup;
mod read;
mod write;

use std::sync::Arc;

use sea_orm::DatabaseTransaction;
use tabula_security::{CallerContext, Capability, PermissionInstance, ReferenceId};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::permission_cache::{self, PermissionCache};
use crate::row::{Attributes, Row};
use crate::schema::{SchemaRegistry, TableSchema, USERGROUP_TABLE};

/// Offset/limit window over rows ordered by creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

impl Page {
    #[must_use]
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }
}

#[derive(Debug, Clone)]
pub enum Operation {
    Create(Attributes),
    FindAll,
    FindOne(ReferenceId),
    Update(ReferenceId, Attributes),
    Delete(ReferenceId),
}

/// One inbound call: which table, what to do, and on whose behalf.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub table: String,
    pub operation: Operation,
    pub caller: CallerContext,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Row(Row),
    Rows(Vec<Row>),
    Deleted(ReferenceId),
}

/// Transaction of one engine call and the permission epoch it saw when
/// the call started.
#[derive(Debug, Clone, Copy)]
struct CallScope<'t> {
    tx: &'t DatabaseTransaction,
    epoch: Option<Uuid>,
}

pub struct ResourceEngine {
    registry: Arc<SchemaRegistry>,
    admin_group: ReferenceId,
    cache: Option<PermissionCache>,
}

impl std::fmt::Debug for ResourceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceEngine")
            .field("registry", &self.registry)
            .field("admin_group", &self.admin_group)
            .field("cached", &self.cache.as_ref().map_or(0, PermissionCache::len))
            .finish()
    }
}

impl ResourceEngine {
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistry>, config: &EngineConfig) -> Self {
        let cache = config
            .permission_cache
            .enabled
            .then(|| PermissionCache::new(config.permission_cache.max_entries));
        Self {
            registry,
            admin_group: config.admin_group(),
            cache,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn admin_group(&self) -> ReferenceId {
        self.admin_group
    }

    #[must_use]
    pub fn cache(&self) -> Option<&PermissionCache> {
        self.cache.as_ref()
    }

    /// Run one request.
    ///
    /// # Errors
    /// Whatever the dispatched operation returns.
    pub async fn execute(
        &self,
        request: ResourceRequest,
        tx: &DatabaseTransaction,
    ) -> Result<Outcome, EngineError> {
        let ResourceRequest {
            table,
            operation,
            caller,
        } = request;
        match operation {
            Operation::Create(attributes) => self
                .create(&table, attributes, &caller, tx)
                .await
                .map(Outcome::Row),
            Operation::FindAll => self.find_all(&table, &caller, tx).await.map(Outcome::Rows),
            Operation::FindOne(reference) => self
                .find_one(&table, reference, &caller, tx)
                .await
                .map(Outcome::Row),
            Operation::Update(reference, attributes) => self
                .update(&table, reference, attributes, &caller, tx)
                .await
                .map(Outcome::Row),
            Operation::Delete(reference) => self
                .delete(&table, reference, &caller, tx)
                .await
                .map(|()| Outcome::Deleted(reference)),
        }
    }

    /// Internal id of a live row.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] if no live row has this reference id.
    pub async fn reference_to_id(
        &self,
        table: &str,
        reference: ReferenceId,
        tx: &DatabaseTransaction,
    ) -> Result<i64, EngineError> {
        let snapshot = self.registry.snapshot();
        let t = snapshot.require(table)?;
        lookup::id_for_reference(tx, &t.name, reference).await
    }

    /// Reference id of a live row.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] if no live row has this internal id.
    pub async fn id_to_reference(
        &self,
        table: &str,
        id: i64,
        tx: &DatabaseTransaction,
    ) -> Result<ReferenceId, EngineError> {
        let snapshot = self.registry.snapshot();
        let t = snapshot.require(table)?;
        lookup::reference_for_id(tx, &t.name, id).await
    }

    /// Permission data for a row, for callers that authorize work done
    /// outside the engine.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] for missing or deleted rows.
    pub async fn permission_of(
        &self,
        table: &str,
        reference: ReferenceId,
        tx: &DatabaseTransaction,
    ) -> Result<PermissionInstance, EngineError> {
        let snapshot = self.registry.snapshot();
        let t = snapshot.require(table)?;
        let scope = self.scope(tx).await?;
        let row = read::load(tx, t, reference).await?;
        self.permission_for(scope, &row).await
    }

    /// Start a call on `tx`. The permission epoch is only read when the
    /// cache is on.
    async fn scope<'t>(&self, tx: &'t DatabaseTransaction) -> Result<CallScope<'t>, EngineError> {
        let epoch = if self.cache.is_some() {
            permission_cache::current_epoch(tx).await?
        } else {
            None
        };
        Ok(CallScope { tx, epoch })
    }

    async fn permission_for(
        &self,
        scope: CallScope<'_>,
        row: &Row,
    ) -> Result<PermissionInstance, EngineError> {
        let cache = self.cache.as_ref().zip(scope.epoch);
        if let Some((cache, epoch)) = cache
            && let Some(hit) = cache.get(row.table_name(), row.reference_id(), epoch)
        {
            return Ok(hit);
        }
        let instance = access::row_permission(scope.tx, row).await?;
        if let Some((cache, epoch)) = cache {
            cache.put(row.table_name(), row.reference_id(), epoch, &instance);
        }
        Ok(instance)
    }

    fn check(
        &self,
        caller: &CallerContext,
        instance: &PermissionInstance,
        cap: Capability,
        table: &str,
    ) -> Result<(), EngineError> {
        if caller.can(instance, cap, self.admin_group) {
            return Ok(());
        }
        tracing::debug!(table, capability = %cap, caller = %caller.user_id(), "denied");
        Err(EngineError::unauthorized(table, cap))
    }

    /// Bookkeeping after a row write. Join tables and `usergroup` carry
    /// group grants, so writing them moves the permission epoch inside `tx`
    /// and empties the local cache. Other writes only drop the row's entry.
    async fn wrote(
        &self,
        tx: &DatabaseTransaction,
        table: &TableSchema,
        reference: ReferenceId,
    ) -> Result<(), EngineError> {
        if table.is_join_table || table.name == USERGROUP_TABLE {
            permission_cache::bump_epoch(tx).await?;
            if let Some(cache) = &self.cache {
                cache.clear();
            }
        } else if let Some(cache) = &self.cache {
            cache.invalidate(&table.name, reference);
        }
        Ok(())
    }
}
