//! Per-row permission cache.
//!
//! Entries hold the binary form of a [`PermissionInstance`], keyed by table
//! and row reference id, and are tagged with the permission epoch they were
//! computed under. An entry that no longer decodes is dropped and treated as
//! a miss.
//!
//! The epoch is a random token persisted in `permission_epoch`. Every write
//! that can change a group grant replaces it inside the writer's
//! transaction. A reader only trusts entries tagged with the epoch its own
//! transaction sees, so grants from a rolled back transaction never match
//! and grants committed by another process invalidate local entries.
//! [`crate::SchemaRegistry::load`] creates and seeds the table.

use dashmap::DashMap;
use sea_orm::ConnectionTrait;
use sea_orm::sea_query::{Alias, ColumnDef, Expr, OnConflict, Query, Table};
use tabula_security::{PermissionInstance, ReferenceId, decode_bin, encode_bin};
use uuid::Uuid;

use crate::error::EngineError;

pub const PERMISSION_EPOCH_TABLE: &str = "permission_epoch";

const EPOCH_ROW: i64 = 1;
const ID: &str = "id";
const EPOCH: &str = "epoch";

#[derive(Debug)]
struct Entry {
    epoch: Uuid,
    blob: Vec<u8>,
}

#[derive(Debug)]
pub struct PermissionCache {
    entries: DashMap<(String, ReferenceId), Entry>,
    max_entries: usize,
}

impl PermissionCache {
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
        }
    }

    /// Cached instance for a row, if one was stored under `epoch`. Entries
    /// from any other epoch are dropped.
    #[must_use]
    pub fn get(&self, table: &str, reference: ReferenceId, epoch: Uuid) -> Option<PermissionInstance> {
        let key = (table.to_owned(), reference);
        let blob = {
            let entry = self.entries.get(&key)?;
            (entry.epoch == epoch).then(|| entry.blob.clone())
        };
        let Some(blob) = blob else {
            self.entries.remove(&key);
            return None;
        };
        match decode_bin(&blob) {
            Ok(instance) => Some(instance),
            Err(e) => {
                tracing::warn!(table, reference = %reference, error = %e, "dropping unreadable cached permission");
                self.entries.remove(&key);
                None
            }
        }
    }

    /// Store an entry. A full cache is emptied first.
    pub fn put(&self, table: &str, reference: ReferenceId, epoch: Uuid, instance: &PermissionInstance) {
        if self.max_entries == 0 {
            return;
        }
        if self.entries.len() >= self.max_entries {
            tracing::debug!(entries = self.entries.len(), "permission cache full, clearing");
            self.entries.clear();
        }
        self.entries.insert(
            (table.to_owned(), reference),
            Entry {
                epoch,
                blob: encode_bin(instance),
            },
        );
    }

    pub fn invalidate(&self, table: &str, reference: ReferenceId) {
        self.entries.remove(&(table.to_owned(), reference));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    fn put_raw(&self, table: &str, reference: ReferenceId, epoch: Uuid, blob: Vec<u8>) {
        self.entries
            .insert((table.to_owned(), reference), Entry { epoch, blob });
    }
}

/// Create `permission_epoch` and seed its single row.
pub(crate) async fn ensure_epoch<C: ConnectionTrait>(conn: &C) -> Result<(), EngineError> {
    let backend = conn.get_database_backend();
    let create = Table::create()
        .table(Alias::new(PERMISSION_EPOCH_TABLE))
        .if_not_exists()
        .col(ColumnDef::new(Alias::new(ID)).big_integer().not_null().primary_key())
        .col(ColumnDef::new(Alias::new(EPOCH)).string_len(36).not_null())
        .to_owned();
    conn.execute(backend.build(&create)).await?;

    let seed = Query::insert()
        .into_table(Alias::new(PERMISSION_EPOCH_TABLE))
        .columns([Alias::new(ID), Alias::new(EPOCH)])
        .values([Expr::value(EPOCH_ROW), Expr::value(Uuid::new_v4().to_string())])?
        .on_conflict(OnConflict::column(Alias::new(ID)).do_nothing().to_owned())
        .to_owned();
    conn.execute(backend.build(&seed)).await?;
    Ok(())
}

/// The epoch visible to `conn`. `None` when the row is missing or does not
/// hold a token, in which case nothing may be cached.
pub(crate) async fn current_epoch<C: ConnectionTrait>(conn: &C) -> Result<Option<Uuid>, EngineError> {
    let stmt = Query::select()
        .column(Alias::new(EPOCH))
        .from(Alias::new(PERMISSION_EPOCH_TABLE))
        .and_where(Expr::col(Alias::new(ID)).eq(EPOCH_ROW))
        .to_owned();
    let backend = conn.get_database_backend();
    let Some(row) = conn.query_one(backend.build(&stmt)).await? else {
        return Ok(None);
    };
    let raw: String = row.try_get("", EPOCH)?;
    match Uuid::parse_str(&raw) {
        Ok(epoch) => Ok(Some(epoch)),
        Err(e) => {
            tracing::warn!(error = %e, "unreadable permission epoch, caching disabled");
            Ok(None)
        }
    }
}

/// Replace the epoch with a fresh token.
pub(crate) async fn bump_epoch<C: ConnectionTrait>(conn: &C) -> Result<(), EngineError> {
    let stmt = Query::insert()
        .into_table(Alias::new(PERMISSION_EPOCH_TABLE))
        .columns([Alias::new(ID), Alias::new(EPOCH)])
        .values([Expr::value(EPOCH_ROW), Expr::value(Uuid::new_v4().to_string())])?
        .on_conflict(
            OnConflict::column(Alias::new(ID))
                .update_column(Alias::new(EPOCH))
                .to_owned(),
        )
        .to_owned();
    let backend = conn.get_database_backend();
    conn.execute(backend.build(&stmt)).await?;
    Ok(())
}
