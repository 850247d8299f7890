use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPool};
use sqlx::query::QueryScalar;
use sqlx::{Executor, PgConnection, Postgres};
use tracing::debug;

use super::error::StoreError;
use super::query::ListQuery;
use super::store::{Row, Store, Table, Transaction};
use crate::filter::{is_valid_identifier, Filter};

const SCHEMA: &str = include_str!("../../migrations/0001_inventory.sql");

/// Postgres backend. Rows travel as JSON: writes go through `jsonb_populate_record`
/// and reads come back through `row_to_json`, so column types never need per-type binding.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    statement_timeout_ms: u64,
}

impl PgStore {
    pub fn new(pool: PgPool, statement_timeout_ms: u64) -> Self {
        Self { pool, statement_timeout_ms }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let mut tx = self.pool.begin().await?;
        if self.statement_timeout_ms > 0 {
            // SET does not accept bind parameters.
            let sql = format!("SET LOCAL statement_timeout = {}", self.statement_timeout_ms);
            sqlx::query(&sql).execute(&mut *tx).await?;
        }
        Ok(Box::new(PgTransaction { tx: Some(tx) }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        self.pool.execute(SCHEMA).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

pub struct PgTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PgTransaction {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx.as_deref_mut().ok_or(StoreError::Closed)
    }
}

fn quote(identifier: &str) -> Result<String, StoreError> {
    if is_valid_identifier(identifier) {
        Ok(format!("\"{}\"", identifier))
    } else {
        Err(StoreError::InvalidQuery(format!("invalid identifier '{}'", identifier)))
    }
}

fn column_list<'a>(columns: impl Iterator<Item = &'a String>) -> Result<String, StoreError> {
    let quoted: Result<Vec<String>, StoreError> = columns.map(|c| quote(c)).collect();
    Ok(quoted?.join(", "))
}

fn bind_param<'q, O>(
    q: QueryScalar<'q, Postgres, O, PgArguments>,
    v: &Value,
) -> QueryScalar<'q, Postgres, O, PgArguments> {
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s.clone()),
        // Arrays are expanded by FilterWhere before binding
        Value::Array(_) | Value::Object(_) => q.bind(v.clone()),
    }
}

fn into_row(value: Value) -> Result<Row, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Backend(format!("expected a JSON row, got {}", other))),
    }
}

fn escape_like(prefix: &str) -> String {
    prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn insert(&mut self, table: Table<'_>, row: Row) -> Result<Row, StoreError> {
        let name = quote(table.name)?;
        let sql = if row.is_empty() {
            format!("INSERT INTO {name} AS t DEFAULT VALUES RETURNING row_to_json(t.*) AS row")
        } else {
            let columns = column_list(row.keys())?;
            format!(
                "INSERT INTO {name} AS t ({columns}) \
                 SELECT {columns} FROM jsonb_populate_record(NULL::{name}, $1) \
                 RETURNING row_to_json(t.*) AS row"
            )
        };
        debug!(table = table.name, "insert");
        let stored: Value = sqlx::query_scalar(&sql)
            .bind(Value::Object(row))
            .fetch_one(self.conn()?)
            .await?;
        into_row(stored)
    }

    async fn insert_many(&mut self, table: Table<'_>, rows: Vec<Row>) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let name = quote(table.name)?;
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        let columns = column_list(columns.iter())?;
        let sql = format!(
            "INSERT INTO {name} ({columns}) SELECT {columns} FROM jsonb_populate_recordset(NULL::{name}, $1)"
        );
        let payload = Value::Array(rows.into_iter().map(Value::Object).collect());
        let result = sqlx::query(&sql).bind(payload).execute(self.conn()?).await?;
        Ok(result.rows_affected())
    }

    async fn fetch(&mut self, table: Table<'_>, id: i64, lock: bool) -> Result<Option<Row>, StoreError> {
        let sql = format!(
            "SELECT row_to_json(t.*) AS row FROM {} t WHERE t.{} = $1{}",
            quote(table.name)?,
            quote(table.key)?,
            if lock { " FOR UPDATE" } else { "" }
        );
        let found: Option<Value> = sqlx::query_scalar(&sql).bind(id).fetch_optional(self.conn()?).await?;
        found.map(into_row).transpose()
    }

    async fn update(&mut self, table: Table<'_>, id: i64, mut changes: Row) -> Result<Option<Row>, StoreError> {
        changes.remove(table.key);
        if changes.is_empty() {
            return self.fetch(table, id, false).await;
        }
        let name = quote(table.name)?;
        let columns = column_list(changes.keys())?;
        let sql = format!(
            "UPDATE {name} AS t SET ({columns}) = \
             (SELECT {columns} FROM jsonb_populate_record(NULL::{name}, $1)) \
             WHERE t.{} = $2 RETURNING row_to_json(t.*) AS row",
            quote(table.key)?
        );
        let updated: Option<Value> = sqlx::query_scalar(&sql)
            .bind(Value::Object(changes))
            .bind(id)
            .fetch_optional(self.conn()?)
            .await?;
        updated.map(into_row).transpose()
    }

    async fn select(&mut self, table: Table<'_>, query: &ListQuery) -> Result<Vec<Row>, StoreError> {
        query.validate()?;
        let mut filter = Filter::new(table.name)?;
        filter.assign(query.to_filter_data())?;
        let inner = filter.to_sql()?;
        let sql = format!("SELECT row_to_json(t.*) AS row FROM ({}) t", inner.query);

        let mut q = sqlx::query_scalar::<_, Value>(&sql);
        for param in &inner.params {
            q = bind_param(q, param);
        }
        let rows = q.fetch_all(self.conn()?).await?;
        rows.into_iter().map(into_row).collect()
    }

    async fn count(&mut self, table: Table<'_>, query: &ListQuery) -> Result<i64, StoreError> {
        query.validate()?;
        let mut filter = Filter::new(table.name)?;
        filter.assign(query.to_filter_data())?;
        let counted = filter.to_count_sql()?;

        let mut q = sqlx::query_scalar::<_, i64>(&counted.query);
        for param in &counted.params {
            q = bind_param(q, param);
        }
        Ok(q.fetch_one(self.conn()?).await?)
    }

    async fn max_value(&mut self, table: Table<'_>, column: &str, prefix: &str) -> Result<Option<String>, StoreError> {
        let column = quote(column)?;
        let sql = format!(
            "SELECT MAX({column}) FROM {} WHERE {column} LIKE $1",
            quote(table.name)?
        );
        let max: Option<String> = sqlx::query_scalar(&sql)
            .bind(format!("{}%", escape_like(prefix)))
            .fetch_one(self.conn()?)
            .await?;
        Ok(max)
    }

    async fn lock_key(&mut self, key: &str) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::Closed)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::Closed)?;
        tx.rollback().await?;
        Ok(())
    }
}
