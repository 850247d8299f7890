use std::ops::{Deref, DerefMut};

use super::error::StoreError;
use super::store::Transaction;

/// Scoped transaction. `commit` consumes it; dropping it on any other path
/// (early return, `?`, panic) rolls the transaction back.
pub struct UnitOfWork {
    tx: Box<dyn Transaction>,
    finished: bool,
}

impl UnitOfWork {
    pub fn new(tx: Box<dyn Transaction>) -> Self {
        Self { tx, finished: false }
    }

    pub async fn commit(mut self) -> Result<(), StoreError> {
        self.finished = true;
        self.tx.commit().await
    }

    pub async fn rollback(mut self) -> Result<(), StoreError> {
        self.finished = true;
        self.tx.rollback().await
    }
}

impl Deref for UnitOfWork {
    type Target = dyn Transaction;

    fn deref(&self) -> &Self::Target {
        self.tx.as_ref()
    }
}

impl DerefMut for UnitOfWork {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.tx.as_mut()
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.finished {
            // The backend's own guard performs the rollback when `tx` is dropped.
            tracing::warn!("Unit of work dropped without commit; rolling back");
        }
    }
}
