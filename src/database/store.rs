use async_trait::async_trait;
use serde_json::{Map, Value};

use super::error::StoreError;
use super::query::ListQuery;

/// A table row as a JSON object keyed by column name.
pub type Row = Map<String, Value>;

/// A table and its primary-key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Table<'a> {
    pub name: &'a str,
    pub key: &'a str,
}

impl<'a> Table<'a> {
    pub fn new(name: &'a str, key: &'a str) -> Self {
        Self { name, key }
    }
}

/// One open database transaction. Every method fails with `StoreError::Closed`
/// once `commit` or `rollback` has run.
#[async_trait]
pub trait Transaction: Send {
    /// Inserts a row and returns it as stored, including the generated key.
    async fn insert(&mut self, table: Table<'_>, row: Row) -> Result<Row, StoreError>;

    /// Inserts many rows in one statement and returns how many were written.
    async fn insert_many(&mut self, table: Table<'_>, rows: Vec<Row>) -> Result<u64, StoreError>;

    /// Loads a row by key regardless of its `active` flag. `lock` takes a row lock
    /// held until the transaction ends.
    async fn fetch(&mut self, table: Table<'_>, id: i64, lock: bool) -> Result<Option<Row>, StoreError>;

    /// Applies `changes` to an existing row and returns the updated row.
    async fn update(&mut self, table: Table<'_>, id: i64, changes: Row) -> Result<Option<Row>, StoreError>;

    async fn select(&mut self, table: Table<'_>, query: &ListQuery) -> Result<Vec<Row>, StoreError>;

    async fn count(&mut self, table: Table<'_>, query: &ListQuery) -> Result<i64, StoreError>;

    /// Greatest text value of `column` starting with `prefix`, across all rows.
    async fn max_value(&mut self, table: Table<'_>, column: &str, prefix: &str) -> Result<Option<String>, StoreError>;

    /// Takes an exclusive lock on an arbitrary key until the transaction ends.
    async fn lock_key(&mut self, key: &str) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// A storage backend that can open transactions.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;

    /// Verifies the backend is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Applies the bundled schema.
    async fn migrate(&self) -> Result<(), StoreError>;

    fn backend(&self) -> &'static str;
}
