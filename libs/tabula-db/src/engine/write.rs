use chrono::Utc;
use sea_orm::sea_query::{Alias, Expr, Query, SimpleExpr};
use sea_orm::{ConnectionTrait, DatabaseTransaction};
use tabula_security::{CallerContext, Capability, ReferenceId};

use super::{CallScope, ResourceEngine};
use super::lookup::ForeignKeys;
use super::read::{load, select_by_reference};
use crate::error::EngineError;
use crate::row::{Attributes, Row};
use crate::schema::column::{CREATED_AT, DELETED_AT, ID, OWNER, PERMISSION, REFERENCE_ID, UPDATED_AT};
use crate::schema::{ColumnInfo, SchemaSnapshot, TableSchema, is_standard};
use crate::value::Value;

fn bind(table: &TableSchema, values: &Attributes) -> Result<Vec<(Alias, SimpleExpr)>, EngineError> {
    values
        .iter()
        .map(|(name, value)| -> Result<(Alias, SimpleExpr), EngineError> {
            let col = table.column(name).ok_or_else(|| {
                EngineError::query(format!("table {} has no column {name}", table.name))
            })?;
            Ok((Alias::new(name.as_str()), Expr::value(col.column_type.bind(value))))
        })
        .collect()
}

fn required(table: &TableSchema, column: &str) -> EngineError {
    EngineError::query(format!("column {}.{column} is required", table.name))
}

impl ResourceEngine {
    /// Insert a row owned by the caller.
    ///
    /// Engine-managed columns in `attributes` are ignored, and columns with a
    /// default may be left out. Foreign keys are given as reference ids; the
    /// target must be live and the caller must be allowed to refer to it.
    ///
    /// # Errors
    /// [`EngineError::Unauthorized`] without create permission on the table,
    /// [`EngineError::QueryConstruction`] for unknown or missing required
    /// columns, [`EngineError::ForeignKeyIntegrity`] for dangling foreign
    /// keys.
    pub async fn create(
        &self,
        table: &str,
        attributes: Attributes,
        caller: &CallerContext,
        tx: &DatabaseTransaction,
    ) -> Result<Row, EngineError> {
        let snapshot = self.registry.snapshot();
        let t = snapshot.require(table)?;
        self.check(caller, &t.table_permission(), Capability::Create, &t.name)?;

        let scope = self.scope(tx).await?;
        let mut values = self.prepare(&snapshot, t, attributes, caller, scope).await?;
        for col in t.writable_columns().filter(|c| !c.nullable) {
            if !values.get(&col.name).is_none_or(Value::is_null) {
                continue;
            }
            if col.is_required() {
                return Err(required(t, &col.name));
            }
            // Leave it to the column default.
            values.remove(&col.name);
        }

        let reference = ReferenceId::new_v4();
        let owner = if caller.is_anonymous() {
            Value::Null
        } else {
            Value::Reference(caller.user_id())
        };
        values.insert(REFERENCE_ID.to_owned(), Value::Reference(reference));
        values.insert(PERMISSION.to_owned(), Value::Int(i64::from(t.default_permission)));
        values.insert(OWNER.to_owned(), owner);
        values.insert(CREATED_AT.to_owned(), Value::Timestamp(Utc::now()));

        let (columns, exprs): (Vec<_>, Vec<_>) = bind(t, &values)?.into_iter().unzip();
        let stmt = Query::insert()
            .into_table(Alias::new(t.name.as_str()))
            .columns(columns)
            .values(exprs)?
            .to_owned();
        tx.execute(tx.get_database_backend().build(&stmt)).await?;
        self.wrote(tx, t, reference).await?;

        // Re-read so the caller sees values as the backend stored them.
        let mut row = load(tx, t, reference).await?;
        ForeignKeys::default().resolve(tx, &mut row).await?;
        tracing::debug!(table, reference = %reference, "row created");
        Ok(row)
    }

    /// Merge `attributes` onto a row, writing only the columns that change.
    ///
    /// # Errors
    /// [`EngineError::NotFound`], [`EngineError::Unauthorized`] without
    /// update permission, plus the column errors of [`Self::create`].
    pub async fn update(
        &self,
        table: &str,
        reference: ReferenceId,
        attributes: Attributes,
        caller: &CallerContext,
        tx: &DatabaseTransaction,
    ) -> Result<Row, EngineError> {
        let snapshot = self.registry.snapshot();
        let t = snapshot.require(table)?;

        let scope = self.scope(tx).await?;
        let current = load(tx, t, reference).await?;
        let perm = self.permission_for(scope, &current).await?;
        self.check(caller, &perm, Capability::Update, &t.name)?;

        let incoming = self.prepare(&snapshot, t, attributes, caller, scope).await?;
        let mut changed = Attributes::new();
        for (name, value) in incoming {
            if current.get(&name) == Some(&value) {
                continue;
            }
            if value.is_null() && t.column(&name).is_some_and(|c| !c.nullable) {
                return Err(required(t, &name));
            }
            changed.insert(name, value);
        }

        if changed.is_empty() {
            tracing::debug!(table, reference = %reference, "update changed nothing");
            let mut row = current;
            ForeignKeys::default().resolve(tx, &mut row).await?;
            return Ok(row);
        }

        let columns = changed.len();
        changed.insert(UPDATED_AT.to_owned(), Value::Timestamp(Utc::now()));
        let stmt = Query::update()
            .table(Alias::new(t.name.as_str()))
            .values(bind(t, &changed)?)
            .and_where(Expr::col(Alias::new(ID)).eq(current.internal_id()))
            .to_owned();
        tx.execute(tx.get_database_backend().build(&stmt)).await?;
        self.wrote(tx, t, reference).await?;

        let mut row = load(tx, t, reference).await?;
        ForeignKeys::default().resolve(tx, &mut row).await?;
        tracing::debug!(table, reference = %reference, columns, "row updated");
        Ok(row)
    }

    /// Soft delete: stamps `deleted_at`. Every read path skips the row from
    /// then on.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] or [`EngineError::Unauthorized`].
    pub async fn delete(
        &self,
        table: &str,
        reference: ReferenceId,
        caller: &CallerContext,
        tx: &DatabaseTransaction,
    ) -> Result<(), EngineError> {
        let snapshot = self.registry.snapshot();
        let t = snapshot.require(table)?;

        let scope = self.scope(tx).await?;
        let row = load(tx, t, reference).await?;
        let perm = self.permission_for(scope, &row).await?;
        self.check(caller, &perm, Capability::Delete, &t.name)?;

        let now = Utc::now();
        let stmt = Query::update()
            .table(Alias::new(t.name.as_str()))
            .values([
                (Alias::new(DELETED_AT), Expr::value(now)),
                (Alias::new(UPDATED_AT), Expr::value(now)),
            ])
            .and_where(Expr::col(Alias::new(ID)).eq(row.internal_id()))
            .to_owned();
        tx.execute(tx.get_database_backend().build(&stmt)).await?;
        self.wrote(tx, t, reference).await?;
        tracing::debug!(table, reference = %reference, "row deleted");
        Ok(())
    }

    /// Coerce caller attributes to column types and swap foreign-key
    /// reference ids for internal ids.
    async fn prepare(
        &self,
        snapshot: &SchemaSnapshot,
        table: &TableSchema,
        attributes: Attributes,
        caller: &CallerContext,
        scope: CallScope<'_>,
    ) -> Result<Attributes, EngineError> {
        let mut out = Attributes::new();
        for (name, value) in attributes {
            if is_standard(&name) {
                tracing::debug!(table = %table.name, column = %name, "ignoring managed column");
                continue;
            }
            let col = table.column(&name).ok_or_else(|| {
                EngineError::query(format!("table {} has no column {name}", table.name))
            })?;
            let value = match col.api_type().coerce(&name, value)? {
                Value::Reference(target) if col.is_foreign() => {
                    Value::Int(self.refer(snapshot, table, col, target, caller, scope).await?)
                }
                other => other,
            };
            out.insert(name, value);
        }
        Ok(out)
    }

    /// Internal id of the row a foreign key points at, after checking it is
    /// live and that the caller may refer to it.
    async fn refer(
        &self,
        snapshot: &SchemaSnapshot,
        table: &TableSchema,
        column: &ColumnInfo,
        target: ReferenceId,
        caller: &CallerContext,
        scope: CallScope<'_>,
    ) -> Result<i64, EngineError> {
        let Some(fk) = &column.foreign_key else {
            return Err(EngineError::query(format!("{} is not a foreign key", column.name)));
        };
        let target_table = snapshot.require(&fk.table)?;
        let Some(row) = select_by_reference(scope.tx, target_table, target).await? else {
            return Err(EngineError::dangling(&table.name, &column.name, &fk.table, &target));
        };
        let perm = self.permission_for(scope, &row).await?;
        self.check(caller, &perm, Capability::Refer, &fk.table)?;
        Ok(row.internal_id())
    }
}
