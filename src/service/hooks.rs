use async_trait::async_trait;

use crate::audit::Actor;
use crate::database::UnitOfWork;
use crate::record::{Entity, Record, RecordError};

/// Per-entity extension points. Every hook runs inside the mutation's unit of
/// work; returning an error rolls the whole mutation back, audit entry included.
#[async_trait]
pub trait RecordHooks<E: Entity>: Send + Sync {
    async fn pre_create(&self, _uow: &mut UnitOfWork, _record: &mut Record, _actor: &Actor) -> Result<(), RecordError> {
        Ok(())
    }

    /// Bulk variant used by `create_many`, where nothing is inserted until every
    /// record is prepared.
    async fn pre_create_many(&self, uow: &mut UnitOfWork, records: &mut [Record], actor: &Actor) -> Result<(), RecordError> {
        for record in records.iter_mut() {
            self.pre_create(uow, record, actor).await?;
        }
        Ok(())
    }

    async fn post_create(&self, _uow: &mut UnitOfWork, _created: &E, _actor: &Actor) -> Result<(), RecordError> {
        Ok(())
    }

    async fn post_update(&self, _uow: &mut UnitOfWork, _before: &E, _after: &E, _actor: &Actor) -> Result<(), RecordError> {
        Ok(())
    }

    async fn post_delete(&self, _uow: &mut UnitOfWork, _deleted: &E, _actor: &Actor) -> Result<(), RecordError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl<E: Entity> RecordHooks<E> for NoHooks {}
