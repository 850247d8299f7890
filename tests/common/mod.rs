#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;

use inventory_api::audit::Actor;
use inventory_api::config::AppConfig;
use inventory_api::database::{
    schema, Database, ListQuery, MemoryStore, Row, Store, StoreError, Table, Transaction,
};
use inventory_api::inventory::{AltaInput, ArticleInput, BajaInput};
use inventory_api::session::open_session;
use inventory_api::storage::{FileStore, FileUpload, LocalFileStore};
use inventory_api::AppState;

/// Ids of the seeded reference catalogs.
#[derive(Debug, Clone, Copy)]
pub struct Catalogs {
    pub article_type: i64,
    pub brand: i64,
    pub inactive_brand: i64,
    pub material: i64,
    pub color: i64,
    pub supplier: i64,
    pub condition: i64,
    pub alta_type: i64,
    pub baja_type: i64,
}

pub struct TestApp {
    pub state: AppState,
    pub db: Database,
    pub actor: Actor,
    pub catalogs: Catalogs,
    pub files: TempDir,
    /// Makes every commit fail while set; see `FlakyStore`.
    pub fail_commits: Arc<AtomicBool>,
    pub clash_on_article: Arc<AtomicUsize>,
}

static TRACING: Once = Once::new();

/// Test output follows `RUST_LOG`, defaulting to warnings only.
fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

pub async fn setup() -> Result<TestApp> {
    setup_with(Duration::from_secs(10), |root| Arc::new(LocalFileStore::new(root)) as Arc<dyn FileStore>).await
}

/// Like `setup`, with a chosen transaction deadline and attachment store.
pub async fn setup_with(
    transaction_timeout: Duration,
    file_store: impl FnOnce(&Path) -> Arc<dyn FileStore>,
) -> Result<TestApp> {
    init_tracing();
    let fail_commits = Arc::new(AtomicBool::new(false));
    let clash_on_article = Arc::new(AtomicUsize::new(0));
    let memory = MemoryStore::new(schema::table_defs(), Duration::from_secs(5));
    let store = FlakyStore {
        inner: memory,
        fail_commits: fail_commits.clone(),
        clash_on_article: clash_on_article.clone(),
    };
    let db = Database::new(Arc::new(store), transaction_timeout);

    let files = tempfile::tempdir()?;
    let mut config = AppConfig::development();
    config.storage.root = files.path().to_string_lossy().into_owned();
    config.audit.strict_identity = true;

    let state = AppState::build(config, db.clone(), file_store(files.path()))?;
    let catalogs = seed_catalogs(&db).await?;
    let session = open_session(&db, 42, chrono::Duration::hours(1)).await?;

    Ok(TestApp { state, db, actor: Actor::new(42, session.id_session),
        catalogs,
        files,
        fail_commits,
        clash_on_article,
    })
}

impl TestApp {
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Makes the `n`th article insert of each transaction hit a folio clash. Zero turns it off.
    pub fn clash_on_article(&self, n: usize) {
        self.clash_on_article.store(n, Ordering::SeqCst);
    }

    pub fn article(&self, description: &str) -> ArticleInput {
        ArticleInput {
            id_article_type: Some(self.catalogs.article_type),
            id_brand: Some(self.catalogs.brand),
            id_condition: Some(self.catalogs.condition),
            ..ArticleInput::new(description)
        }
    }

    pub fn alta(&self, articles: Vec<ArticleInput>) -> AltaInput {
        AltaInput {
            catalog_type_id: self.catalogs.alta_type,
            observations: Some("Quarterly intake".to_string()),
            articles,
            file: Some(pdf("acta-alta.pdf")),
        }
    }

    pub fn baja(&self, article_ids: Vec<i64>) -> BajaInput {
        BajaInput {
            catalog_type_id: self.catalogs.baja_type,
            observations: Some("Damaged beyond repair".to_string()),
            article_ids,
            file: Some(pdf("acta-baja.pdf")),
        }
    }

    /// Rows of `table`, inactive included.
    pub async fn rows(&self, table: &str, key: &str) -> Result<Vec<Row>> {
        let mut uow = self.db.begin().await?;
        let rows = uow.select(Table::new(table, key), &ListQuery::new().include_inactive(true)).await?;
        uow.rollback().await?;
        Ok(rows)
    }

    pub async fn count(&self, table: &str, key: &str) -> Result<usize> {
        Ok(self.rows(table, key).await?.len())
    }

    pub async fn audit_rows(&self) -> Result<Vec<Row>> {
        self.rows("tr_audit_log", "id_audit_log").await
    }

    /// Stores an article with a given folio directly, bypassing the services.
    pub async fn seed_article(&self, folio: &str) -> Result<i64> {
        let mut uow = self.db.begin().await?;
        let row = uow
            .insert(
                Table::new("tr_article", "id_article"),
                object(json!({
                    "folio": folio,
                    "description": "Seeded article",
                    "active": true,
                    "created_by": 1,
                    "created_at": Utc::now().to_rfc3339(),
                })),
            )
            .await?;
        uow.commit().await?;
        Ok(row["id_article"].as_i64().unwrap_or_default())
    }

    /// Files currently stored under a domain, across all headers.
    pub fn stored_files(&self, domain: &str) -> Vec<std::path::PathBuf> {
        let mut found = Vec::new();
        let Ok(headers) = std::fs::read_dir(self.files.path().join(domain)) else { return found };
        for header in headers.flatten() {
            if let Ok(entries) = std::fs::read_dir(header.path()) {
                found.extend(entries.flatten().map(|e| e.path()));
            }
        }
        found
    }
}

pub fn year() -> i32 {
    Utc::now().year()
}

pub fn folio(sequence: u32) -> String {
    format!("INV-{}-{:07}", year(), sequence)
}

pub fn pdf(name: &str) -> FileUpload {
    FileUpload::new(b"%PDF-1.4 test document".to_vec(), name, "application/pdf")
}

pub fn object(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

async fn seed_catalogs(db: &Database) -> Result<Catalogs> {
    let mut uow = db.begin().await?;
    let mut ids = Vec::new();
    let entries: [(&str, &str, Value); 9] = [
        ("ct_inventory_article_type", "id_article_type", json!({ "name": "Furniture", "active": true })),
        ("ct_inventory_brand", "id_brand", json!({ "name": "Acme", "active": true })),
        ("ct_inventory_brand", "id_brand", json!({ "name": "Defunct", "active": false })),
        ("ct_inventory_material", "id_material", json!({ "name": "Wood", "active": true })),
        ("ct_inventory_color", "id_color", json!({ "name": "Black", "active": true })),
        ("ct_inventory_supplier", "id_supplier", json!({ "name": "Office Depot", "active": true })),
        ("ct_inventory_condition", "id_condition", json!({ "name": "New", "active": true })),
        ("ct_inventory_operation_type", "id_operation_type", json!({ "name": "Purchase", "kind": "alta", "active": true })),
        ("ct_inventory_operation_type", "id_operation_type", json!({ "name": "Disposal", "kind": "baja", "active": true })),
    ];
    for (table, key, row) in entries {
        let stored = uow.insert(Table::new(table, key), object(row)).await?;
        ids.push(stored[key].as_i64().unwrap_or_default());
    }
    uow.commit().await?;

    Ok(Catalogs {
        article_type: ids[0],
        brand: ids[1],
        inactive_brand: ids[2],
        material: ids[3],
        color: ids[4],
        supplier: ids[5],
        condition: ids[6],
        alta_type: ids[7],
        baja_type: ids[8],
    })
}

/// Memory backend whose commits, or one article insert, can be made to fail on demand.
pub struct FlakyStore {
    inner: MemoryStore,
    fail_commits: Arc<AtomicBool>,
    clash_on_article: Arc<AtomicUsize>,
}

#[async_trait]
impl Store for FlakyStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let tx = self.inner.begin().await?;
        Ok(Box::new(FlakyTransaction {
            inner: tx,
            fail_commits: self.fail_commits.clone(),
            clash_on_article: self.clash_on_article.clone(),
            article_inserts: 0,
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        self.inner.migrate().await
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

struct FlakyTransaction {
    inner: Box<dyn Transaction>,
    fail_commits: Arc<AtomicBool>,
    clash_on_article: Arc<AtomicUsize>,
    article_inserts: usize,
}

#[async_trait]
impl Transaction for FlakyTransaction {
    async fn insert(&mut self, table: Table<'_>, row: Row) -> Result<Row, StoreError> {
        if table.name == "tr_article" {
            self.article_inserts += 1;
            if self.article_inserts == self.clash_on_article.load(Ordering::SeqCst) {
                return Err(StoreError::UniqueViolation("folio".to_string()));
            }
        }
        self.inner.insert(table, row).await
    }

    async fn insert_many(&mut self, table: Table<'_>, rows: Vec<Row>) -> Result<u64, StoreError> {
        self.inner.insert_many(table, rows).await
    }

    async fn fetch(&mut self, table: Table<'_>, id: i64, lock: bool) -> Result<Option<Row>, StoreError> {
        self.inner.fetch(table, id, lock).await
    }

    async fn update(&mut self, table: Table<'_>, id: i64, changes: Row) -> Result<Option<Row>, StoreError> {
        self.inner.update(table, id, changes).await
    }

    async fn select(&mut self, table: Table<'_>, query: &ListQuery) -> Result<Vec<Row>, StoreError> {
        self.inner.select(table, query).await
    }

    async fn count(&mut self, table: Table<'_>, query: &ListQuery) -> Result<i64, StoreError> {
        self.inner.count(table, query).await
    }

    async fn max_value(&mut self, table: Table<'_>, column: &str, prefix: &str) -> Result<Option<String>, StoreError> {
        self.inner.max_value(table, column, prefix).await
    }

    async fn lock_key(&mut self, key: &str) -> Result<(), StoreError> {
        self.inner.lock_key(key).await
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            self.inner.rollback().await?;
            return Err(StoreError::Backend("commit refused".to_string()));
        }
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}
