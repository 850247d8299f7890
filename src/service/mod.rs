pub mod error;
pub mod hooks;

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::audit::{Actor, AuditEvent, AuditRecorder};
use crate::config::FilterConfig;
use crate::database::{Database, ListQuery, Row, Table, UnitOfWork};
use crate::identity::IdentityResolver;
use crate::record::{is_active, Entity, Record, RecordError};

pub use error::ServiceError;
pub use hooks::{NoHooks, RecordHooks};

/// Shared collaborators every service is built from.
#[derive(Clone)]
pub struct ServiceContext {
    pub db: Database,
    pub identity: Arc<IdentityResolver>,
    pub audit: Arc<AuditRecorder>,
    pub filter: FilterConfig,
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, per_page: 25 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_info: PageInfo,
}

/// Create/read/update/soft-delete for one entity type, with audit entries written
/// in the same transaction as each mutation.
pub struct RecordService<E: Entity, H: RecordHooks<E> = NoHooks> {
    ctx: ServiceContext,
    key: String,
    hooks: H,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> RecordService<E, NoHooks> {
    pub fn new(ctx: ServiceContext) -> Result<Self, RecordError> {
        Self::with_hooks(ctx, NoHooks)
    }
}

impl<E: Entity, H: RecordHooks<E>> RecordService<E, H> {
    pub fn with_hooks(ctx: ServiceContext, hooks: H) -> Result<Self, RecordError> {
        let key = ctx.identity.resolve(E::TABLE)?;
        Ok(Self { ctx, key, hooks, _entity: PhantomData })
    }

    pub fn table(&self) -> Table<'_> {
        Table::new(E::TABLE, &self.key)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn label(&self) -> String {
        self.ctx.identity.convention().label(E::TABLE)
    }

    fn not_found(&self, id: i64) -> RecordError {
        RecordError::NotFound { entity: self.label(), id }
    }

    /// Lists rows matching `query`, active only unless the query says otherwise.
    pub async fn list(&self, query: ListQuery, pagination: Pagination) -> Result<Page<E>, RecordError> {
        let max = self.ctx.filter.max_limit.unwrap_or(i64::MAX);
        let per_page = if pagination.per_page <= 0 { self.ctx.filter.default_per_page } else { pagination.per_page }.min(max).max(1);
        let page = pagination.page.max(1);

        let mut query = query.page(per_page, (page - 1) * per_page);
        if query.order.is_empty() {
            query = query.order_by(self.key.clone(), crate::filter::SortDirection::Asc);
        }

        let mut uow = self.ctx.db.begin().await?;
        let total = uow.count(self.table(), &query).await?;
        let rows = uow.select(self.table(), &query).await?;
        uow.rollback().await?;

        let items = rows.into_iter().map(E::from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            page_info: PageInfo { total, page, per_page, total_pages: (total + per_page - 1) / per_page },
        })
    }

    /// Loads one row. Inactive rows are Not-Found unless `include_inactive`.
    pub async fn get(&self, id: i64, include_inactive: bool) -> Result<E, RecordError> {
        let mut uow = self.ctx.db.begin().await?;
        let row = uow.fetch(self.table(), id, false).await?;
        uow.rollback().await?;

        match row {
            Some(row) if include_inactive || is_active(&row) => E::from_row(row),
            _ => Err(self.not_found(id)),
        }
    }

    pub async fn create(&self, input: Value, actor: &Actor) -> Result<E, RecordError> {
        let record = Record::from_input(input, &self.key)?;
        self.ctx
            .db
            .bounded(async {
                let mut uow = self.ctx.db.begin().await?;
                let created = self.create_in(&mut uow, record, actor).await?;
                uow.commit().await?;
                Ok::<_, RecordError>(created)
            })
            .await
    }

    pub async fn update(&self, id: i64, input: Value, actor: &Actor) -> Result<E, RecordError> {
        let record = Record::from_input(input, &self.key)?;
        self.ctx
            .db
            .bounded(async {
                let mut uow = self.ctx.db.begin().await?;
                let updated = self.update_in(&mut uow, id, record, actor).await?;
                uow.commit().await?;
                Ok::<_, RecordError>(updated)
            })
            .await
    }

    pub async fn delete(&self, id: i64, actor: &Actor) -> Result<(), RecordError> {
        self.ctx
            .db
            .bounded(async {
                let mut uow = self.ctx.db.begin().await?;
                self.delete_in(&mut uow, id, actor).await?;
                uow.commit().await?;
                Ok::<_, RecordError>(())
            })
            .await
    }

    /// Bulk insert in one statement. Runs `pre_create_many` over all records but writes
    /// no audit entries and no post hooks.
    pub async fn create_many(&self, inputs: Vec<Value>, actor: &Actor) -> Result<u64, RecordError> {
        let records = inputs
            .into_iter()
            .map(|input| Record::from_input(input, &self.key))
            .collect::<Result<Vec<_>, _>>()?;

        self.ctx
            .db
            .bounded(async {
                let mut uow = self.ctx.db.begin().await?;
                let mut records = records;
                self.hooks.pre_create_many(&mut uow, &mut records, actor).await?;

                let now = Utc::now();
                let mut rows = Vec::with_capacity(records.len());
                for mut record in records {
                    if let Some(field) = record.missing_required(E::REQUIRED) {
                        return Err(RecordError::RequiredFieldMissing(field.to_string()));
                    }
                    record.stamp_created(actor.user_id, now);
                    rows.push(record.into_row());
                }
                let count = uow.insert_many(self.table(), rows).await?;
                uow.commit().await?;
                info!(table = E::TABLE, count, "Bulk insert committed without audit trail");
                Ok::<_, RecordError>(count)
            })
            .await
    }

    /// Loads a row in the caller's transaction, active or not.
    pub async fn fetch_in(&self, uow: &mut UnitOfWork, id: i64, lock: bool) -> Result<Option<E>, RecordError> {
        uow.fetch(self.table(), id, lock).await?.map(E::from_row).transpose()
    }

    pub async fn create_in(&self, uow: &mut UnitOfWork, mut record: Record, actor: &Actor) -> Result<E, RecordError> {
        self.hooks.pre_create(uow, &mut record, actor).await?;
        if let Some(field) = record.missing_required(E::REQUIRED) {
            return Err(RecordError::RequiredFieldMissing(field.to_string()));
        }
        record.stamp_created(actor.user_id, Utc::now());

        let row = uow.insert(self.table(), record.into_row()).await?;
        if E::AUDITED {
            self.ctx.audit.record(&mut **uow, AuditEvent::created(E::TABLE, &row, actor)).await?;
        }

        let created = E::from_row(row)?;
        self.hooks.post_create(uow, &created, actor).await?;
        debug!(table = E::TABLE, "Record created");
        Ok(created)
    }

    pub async fn update_in(&self, uow: &mut UnitOfWork, id: i64, input: Record, actor: &Actor) -> Result<E, RecordError> {
        let before = self.load_active(uow, id).await?;

        let mut record = Record::from_row(before.clone());
        record.apply(input);
        if record.changed_fields().is_empty() {
            return E::from_row(before);
        }
        record.stamp_updated(actor.user_id, Utc::now());

        let after = uow
            .update(self.table(), id, record.changes())
            .await?
            .ok_or_else(|| self.not_found(id))?;
        if E::AUDITED {
            self.ctx.audit.record(&mut **uow, AuditEvent::updated(E::TABLE, &before, &after, actor)).await?;
        }

        let (before, after) = (E::from_row(before)?, E::from_row(after)?);
        self.hooks.post_update(uow, &before, &after, actor).await?;
        Ok(after)
    }

    /// Soft delete: flips `active` off and stamps the updater. Rows are never removed.
    pub async fn delete_in(&self, uow: &mut UnitOfWork, id: i64, actor: &Actor) -> Result<E, RecordError> {
        let before = self.load_active(uow, id).await?;

        let mut record = Record::from_row(before.clone());
        record.set_system_field("active", false);
        record.stamp_updated(actor.user_id, Utc::now());

        let after = uow
            .update(self.table(), id, record.changes())
            .await?
            .ok_or_else(|| self.not_found(id))?;
        if E::AUDITED {
            self.ctx.audit.record(&mut **uow, AuditEvent::deleted(E::TABLE, &before, actor)).await?;
        }

        let deleted = E::from_row(after)?;
        self.hooks.post_delete(uow, &deleted, actor).await?;
        Ok(deleted)
    }

    /// Lifecycle transition to inactive, audited as an UPDATE with reduced
    /// snapshots: `{active: true}` before and `{active: false}` plus `context` after.
    pub async fn deactivate_in(&self, uow: &mut UnitOfWork, id: i64, context: Row, actor: &Actor) -> Result<E, RecordError> {
        let before = self.load_active(uow, id).await?;

        let mut record = Record::from_row(before);
        record.set_system_field("active", false);
        record.stamp_updated(actor.user_id, Utc::now());

        let updated = uow
            .update(self.table(), id, record.changes())
            .await?
            .ok_or_else(|| self.not_found(id))?;

        if E::AUDITED {
            let before_state = Row::from_iter([("active".to_string(), Value::Bool(true))]);
            let mut after_state = context;
            after_state.insert("active".to_string(), Value::Bool(false));
            let event = AuditEvent::updated(E::TABLE, &before_state, &after_state, actor).with_record_id(id);
            self.ctx.audit.record(&mut **uow, event).await?;
        }

        E::from_row(updated)
    }

    async fn load_active(&self, uow: &mut UnitOfWork, id: i64) -> Result<Row, RecordError> {
        match uow.fetch(self.table(), id, true).await? {
            Some(row) if is_active(&row) => Ok(row),
            _ => Err(self.not_found(id)),
        }
    }
}
