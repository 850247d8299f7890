use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::error::StoreError;
use super::query::{compare_values, ListQuery};
use super::store::{Row, Store, Table, Transaction};

/// Constraints the in-memory backend enforces for one table.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: &'static str,
    pub key: &'static str,
    pub unique: Vec<&'static str>,
    pub not_null: Vec<&'static str>,
    /// `(column, referenced table)`; the referenced key is that table's own key.
    pub foreign_keys: Vec<(&'static str, &'static str)>,
}

impl TableDef {
    pub fn new(name: &'static str, key: &'static str) -> Self {
        Self { name, key, unique: vec![], not_null: vec![], foreign_keys: vec![] }
    }

    pub fn unique(mut self, column: &'static str) -> Self {
        self.unique.push(column);
        self
    }

    pub fn not_null(mut self, columns: &[&'static str]) -> Self {
        self.not_null.extend_from_slice(columns);
        self
    }

    pub fn references(mut self, column: &'static str, table: &'static str) -> Self {
        self.foreign_keys.push((column, table));
        self
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    next_id: i64,
    rows: BTreeMap<i64, Row>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
}

/// In-process backend. One transaction at a time holds the whole state, works on a
/// private copy and publishes it on commit, so transactions are serializable.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    defs: Arc<HashMap<&'static str, TableDef>>,
    acquire_timeout: Duration,
}

impl MemoryStore {
    pub fn new(defs: Vec<TableDef>, acquire_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            defs: Arc::new(defs.into_iter().map(|d| (d.name, d)).collect()),
            acquire_timeout,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let guard = tokio::time::timeout(self.acquire_timeout, self.state.clone().lock_owned())
            .await
            .map_err(|_| StoreError::Timeout)?;
        let working = (*guard).clone();
        Ok(Box::new(MemoryTransaction { guard: Some(guard), working, defs: self.defs.clone() }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

pub struct MemoryTransaction {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    working: MemoryState,
    defs: Arc<HashMap<&'static str, TableDef>>,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.guard.is_some() { Ok(()) } else { Err(StoreError::Closed) }
    }

    fn table_mut(&mut self, name: &str) -> &mut MemoryTable {
        self.working.tables.entry(name.to_string()).or_insert_with(|| MemoryTable { next_id: 1, rows: BTreeMap::new() })
    }

    fn check_constraints(&self, table: Table<'_>, id: i64, row: &Row) -> Result<(), StoreError> {
        let Some(def) = self.defs.get(table.name) else { return Ok(()) };

        for column in &def.not_null {
            if row.get(*column).map_or(true, Value::is_null) {
                return Err(StoreError::NotNullViolation(column.to_string()));
            }
        }

        if let Some(existing) = self.working.tables.get(table.name) {
            for column in &def.unique {
                let Some(value) = row.get(*column).filter(|v| !v.is_null()) else { continue };
                let clash = existing
                    .rows
                    .iter()
                    .any(|(other_id, other)| *other_id != id && other.get(*column) == Some(value));
                if clash {
                    return Err(StoreError::UniqueViolation(column.to_string()));
                }
            }
        }

        for (column, referenced) in &def.foreign_keys {
            let Some(value) = row.get(*column).filter(|v| !v.is_null()) else { continue };
            let key = value.as_i64().ok_or_else(|| StoreError::ForeignKeyViolation(column.to_string()))?;
            let present = self
                .working
                .tables
                .get(*referenced)
                .map_or(false, |t| t.rows.contains_key(&key));
            if !present {
                return Err(StoreError::ForeignKeyViolation(column.to_string()));
            }
        }
        Ok(())
    }

    fn insert_row(&mut self, table: Table<'_>, mut row: Row) -> Result<Row, StoreError> {
        let explicit = row.get(table.key).and_then(Value::as_i64);
        let id = match explicit {
            Some(id) => id,
            None => self.table_mut(table.name).next_id,
        };
        if self.table_mut(table.name).rows.contains_key(&id) {
            return Err(StoreError::UniqueViolation(table.key.to_string()));
        }
        row.insert(table.key.to_string(), Value::from(id));
        self.check_constraints(table, id, &row)?;

        let t = self.table_mut(table.name);
        t.next_id = t.next_id.max(id + 1);
        t.rows.insert(id, row.clone());
        Ok(row)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn insert(&mut self, table: Table<'_>, row: Row) -> Result<Row, StoreError> {
        self.ensure_open()?;
        self.insert_row(table, row)
    }

    async fn insert_many(&mut self, table: Table<'_>, rows: Vec<Row>) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let mut count = 0;
        for row in rows {
            self.insert_row(table, row)?;
            count += 1;
        }
        Ok(count)
    }

    async fn fetch(&mut self, table: Table<'_>, id: i64, _lock: bool) -> Result<Option<Row>, StoreError> {
        self.ensure_open()?;
        Ok(self.working.tables.get(table.name).and_then(|t| t.rows.get(&id)).cloned())
    }

    async fn update(&mut self, table: Table<'_>, id: i64, changes: Row) -> Result<Option<Row>, StoreError> {
        self.ensure_open()?;
        let Some(mut row) = self.working.tables.get(table.name).and_then(|t| t.rows.get(&id)).cloned() else {
            return Ok(None);
        };
        for (column, value) in changes {
            if column != table.key {
                row.insert(column, value);
            }
        }
        self.check_constraints(table, id, &row)?;
        self.table_mut(table.name).rows.insert(id, row.clone());
        Ok(Some(row))
    }

    async fn select(&mut self, table: Table<'_>, query: &ListQuery) -> Result<Vec<Row>, StoreError> {
        self.ensure_open()?;
        query.validate()?;
        let mut rows: Vec<Row> = self
            .working
            .tables
            .get(table.name)
            .map(|t| t.rows.values().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();

        if !query.order.is_empty() {
            rows.sort_by(|a, b| {
                for (column, direction) in &query.order {
                    let ord = compare_values(a.get(column).unwrap_or(&Value::Null), b.get(column).unwrap_or(&Value::Null));
                    let ord = match direction {
                        crate::filter::SortDirection::Asc => ord,
                        crate::filter::SortDirection::Desc => ord.reverse(),
                    };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        let offset = query.offset.unwrap_or(0).max(0) as usize;
        let limit = query.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&mut self, table: Table<'_>, query: &ListQuery) -> Result<i64, StoreError> {
        self.ensure_open()?;
        query.validate()?;
        Ok(self
            .working
            .tables
            .get(table.name)
            .map(|t| t.rows.values().filter(|r| query.matches(r)).count() as i64)
            .unwrap_or(0))
    }

    async fn max_value(&mut self, table: Table<'_>, column: &str, prefix: &str) -> Result<Option<String>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .working
            .tables
            .get(table.name)
            .and_then(|t| {
                t.rows
                    .values()
                    .filter_map(|r| r.get(column).and_then(Value::as_str))
                    .filter(|v| v.starts_with(prefix))
                    .max()
                    .map(str::to_string)
            }))
    }

    async fn lock_key(&mut self, _key: &str) -> Result<(), StoreError> {
        // The whole state is already held exclusively.
        self.ensure_open()
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let mut guard = self.guard.take().ok_or(StoreError::Closed)?;
        *guard = std::mem::take(&mut self.working);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.guard.take().ok_or(StoreError::Closed)?;
        Ok(())
    }
}
