mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use inventory_api::inventory::{BatchStage, OperationKind};
use inventory_api::service::ServiceError;
use inventory_api::storage::{FileStore, FileUpload, LocalFileStore, StorageError, StoredFile};

use common::{folio, setup, setup_with, TestApp};

/// Disk store that lingers after writing, so a short deadline fires mid-write.
struct SlowFileStore {
    inner: LocalFileStore,
    linger: Duration,
}

#[async_trait]
impl FileStore for SlowFileStore {
    fn place(&self, domain: &str, header_id: i64, upload: &FileUpload) -> Result<StoredFile, StorageError> {
        self.inner.place(domain, header_id, upload)
    }

    async fn write(&self, target: &StoredFile, bytes: &[u8]) -> Result<(), StorageError> {
        self.inner.write(target, bytes).await?;
        tokio::time::sleep(self.linger).await;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.inner.delete(path).await
    }
}

const ARTICLE: (&str, &str) = ("tr_article", "id_article");
const HEADER: (&str, &str) = ("tr_operation", "id_operation");
const LINK: (&str, &str) = ("rel_operation_article", "id_operation_article");
const FILE: (&str, &str) = ("tr_operation_file", "id_operation_file");

async fn count(app: &TestApp, (table, key): (&str, &str)) -> Result<usize> {
    app.count(table, key).await
}

async fn audit_trail(app: &TestApp) -> Result<Vec<(String, String)>> {
    Ok(app
        .audit_rows()
        .await?
        .iter()
        .map(|row| {
            (
                row["table_name"].as_str().unwrap_or_default().to_string(),
                row["action"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect())
}

#[tokio::test]
async fn alta_registers_articles_header_links_and_file() -> Result<()> {
    let app = setup().await?;
    app.seed_article(&folio(10)).await?;

    let input = app.alta(vec![app.article("Conference table"), app.article("Office chair")]);
    let result = app.state.orchestrator.create_alta_batch(input, &app.actor).await?;

    let folios: Vec<&str> = result.articles.iter().map(|a| a.folio.as_str()).collect();
    assert_eq!(folios, vec![folio(11), folio(12)]);
    assert_eq!(result.header.kind, OperationKind::Alta);
    assert_eq!(result.header.id_operation_type, app.catalogs.alta_type);
    assert_eq!(result.header.observations.as_deref(), Some("Quarterly intake"));
    assert_eq!(result.links.len(), 2);
    for (link, article) in result.links.iter().zip(&result.articles) {
        assert_eq!(link.id_operation, result.header.id_operation);
        assert_eq!(link.id_article, article.id_article);
    }
    assert_eq!(result.file.id_operation, result.header.id_operation);
    assert_eq!(result.file.original_name, "acta-alta.pdf");
    assert!(Path::new(&result.file.storage_path).is_file());
    assert_eq!(
        result.summary,
        format!("Operation #{} (alta): registered 2 articles ({} .. {})", result.header.id_operation, folio(11), folio(12))
    );

    assert_eq!(count(&app, ARTICLE).await?, 3);
    assert_eq!(count(&app, HEADER).await?, 1);
    assert_eq!(count(&app, LINK).await?, 2);
    assert_eq!(count(&app, FILE).await?, 1);

    let trail = audit_trail(&app).await?;
    let expected = [
        ("tr_article", "CREATE"),
        ("tr_article", "CREATE"),
        ("tr_operation", "CREATE"),
        ("tr_operation_file", "CREATE"),
    ];
    assert_eq!(trail.len(), expected.len());
    for ((table, action), (want_table, want_action)) in trail.iter().zip(expected) {
        assert_eq!((table.as_str(), action.as_str()), (want_table, want_action));
    }
    Ok(())
}

#[tokio::test]
async fn one_bad_article_rejects_the_whole_batch() -> Result<()> {
    let app = setup().await?;

    let mut articles: Vec<_> = (0..4).map(|n| app.article(&format!("Locker {}", n))).collect();
    articles[2].id_brand = Some(app.catalogs.inactive_brand);

    let err = app
        .state
        .orchestrator
        .create_alta_batch(app.alta(articles), &app.actor)
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("batch with an inactive brand was accepted"))?;

    assert_eq!(err.stage, BatchStage::Validation);
    assert!(matches!(err.source, ServiceError::Validation { ref field, .. } if field == "articles[2].id_brand"));

    for table in [ARTICLE, HEADER, LINK, FILE] {
        assert_eq!(count(&app, table).await?, 0, "{}", table.0);
    }
    assert!(app.audit_rows().await?.is_empty());
    assert!(app.stored_files("intake").is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_commit_rolls_back_and_removes_the_stored_file() -> Result<()> {
    let app = setup().await?;
    app.fail_commits(true);

    let input = app.alta(vec![app.article("Filing cabinet"), app.article("Bookshelf")]);
    let err = app
        .state
        .orchestrator
        .create_alta_batch(input, &app.actor)
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("commit failure went unnoticed"))?;
    app.fail_commits(false);

    assert_eq!(err.stage, BatchStage::Commit);
    assert_eq!(err.kind(), "internal");
    for table in [ARTICLE, HEADER, LINK, FILE] {
        assert_eq!(count(&app, table).await?, 0, "{}", table.0);
    }
    assert!(app.audit_rows().await?.is_empty());
    assert!(app.stored_files("intake").is_empty());

    // The sequence was never consumed.
    let retry = app.alta(vec![app.article("Filing cabinet")]);
    let result = app.state.orchestrator.create_alta_batch(retry, &app.actor).await?;
    assert_eq!(result.articles[0].folio, folio(1));
    Ok(())
}

#[tokio::test]
async fn clash_midway_through_the_articles_rolls_everything_back() -> Result<()> {
    let app = setup().await?;
    app.clash_on_article(3);

    let articles: Vec<_> = (0..6).map(|n| app.article(&format!("Desk {}", n))).collect();
    let err = app
        .state
        .orchestrator
        .create_alta_batch(app.alta(articles), &app.actor)
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("folio clash went unnoticed"))?;

    assert_eq!(err.stage, BatchStage::Articles);
    assert_eq!(err.kind(), "conflict");
    for table in [ARTICLE, HEADER, LINK, FILE] {
        assert_eq!(count(&app, table).await?, 0, "{}", table.0);
    }
    assert!(app.audit_rows().await?.is_empty());
    assert!(app.stored_files("intake").is_empty());

    app.clash_on_article(0);
    let result = app
        .state
        .orchestrator
        .create_alta_batch(app.alta(vec![app.article("Desk 0")]), &app.actor)
        .await?;
    assert_eq!(result.articles[0].folio, folio(1));
    Ok(())
}

#[tokio::test]
async fn deadline_during_the_file_write_removes_the_file() -> Result<()> {
    let app = setup_with(Duration::from_millis(200), |root| {
        Arc::new(SlowFileStore { inner: LocalFileStore::new(root), linger: Duration::from_millis(500) }) as Arc<dyn FileStore>
    })
    .await?;

    let err = app
        .state
        .orchestrator
        .create_alta_batch(app.alta(vec![app.article("Projector")]), &app.actor)
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("batch outlived its deadline"))?;

    assert_eq!(err.stage, BatchStage::File);
    assert_eq!(err.kind(), "timeout");
    assert_eq!(count(&app, ARTICLE).await?, 0);
    assert!(app.audit_rows().await?.is_empty());
    assert!(app.stored_files("intake").is_empty(), "{:?}", app.stored_files("intake"));
    Ok(())
}

#[tokio::test]
async fn baja_retires_articles_and_records_the_operation() -> Result<()> {
    let app = setup().await?;
    let alta = app
        .state
        .orchestrator
        .create_alta_batch(app.alta(vec![app.article("Printer"), app.article("Scanner")]), &app.actor)
        .await?;
    let printer = alta.articles[0].id_article;

    let baja = app.state.orchestrator.create_baja_batch(app.baja(vec![printer]), &app.actor).await?;
    assert_eq!(baja.header.kind, OperationKind::Baja);
    assert_eq!(baja.articles.len(), 1);
    assert!(!baja.articles[0].active);
    assert_eq!(baja.links[0].id_article, printer);
    assert!(baja.summary.contains("decommissioned 1 article"));
    assert_eq!(app.stored_files("decommission").len(), 1);

    let articles = app.state.orchestrator.articles();
    assert!(!articles.get(printer, true).await?.active);
    assert!(articles.get(alta.articles[1].id_article, false).await?.active);

    let retire = app
        .audit_rows()
        .await?
        .into_iter()
        .find(|row| row["table_name"] == json!("tr_article") && row["action"] == json!("UPDATE"))
        .ok_or_else(|| anyhow::anyhow!("no audit entry for the decommission"))?;
    assert_eq!(retire["record_id"], json!(printer));
    assert_eq!(retire["before_state"], json!({ "active": true }));
    assert_eq!(retire["after_state"], json!({ "active": false, "id_operation": baja.header.id_operation }));
    Ok(())
}

#[tokio::test]
async fn second_decommission_conflicts_and_leaves_the_first_intact() -> Result<()> {
    let app = setup().await?;
    let alta = app
        .state
        .orchestrator
        .create_alta_batch(app.alta(vec![app.article("Monitor"), app.article("Keyboard")]), &app.actor)
        .await?;
    let (monitor, keyboard) = (alta.articles[0].id_article, alta.articles[1].id_article);

    app.state.orchestrator.create_baja_batch(app.baja(vec![monitor]), &app.actor).await?;
    let headers_before = count(&app, HEADER).await?;
    let audits_before = app.audit_rows().await?.len();

    let err = app
        .state
        .orchestrator
        .create_baja_batch(app.baja(vec![keyboard, monitor]), &app.actor)
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("article was decommissioned twice"))?;

    assert_eq!(err.stage, BatchStage::Articles);
    assert!(matches!(err.source, ServiceError::Conflict(ref msg) if msg.contains(&alta.articles[0].folio)));
    assert_eq!(count(&app, HEADER).await?, headers_before);
    assert_eq!(app.audit_rows().await?.len(), audits_before);
    assert!(app.state.orchestrator.articles().get(keyboard, false).await?.active);
    assert_eq!(app.stored_files("decommission").len(), 1);
    Ok(())
}

#[tokio::test]
async fn baja_of_a_missing_article_is_not_found() -> Result<()> {
    let app = setup().await?;

    let err = app
        .state
        .orchestrator
        .create_baja_batch(app.baja(vec![12_345]), &app.actor)
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("missing article was decommissioned"))?;

    assert_eq!(err.stage, BatchStage::Articles);
    assert_eq!(err.kind(), "not_found");
    assert_eq!(count(&app, HEADER).await?, 0);
    Ok(())
}

#[tokio::test]
async fn submissions_are_validated_before_any_write() -> Result<()> {
    let app = setup().await?;
    let orchestrator = &app.state.orchestrator;

    let field_of = |err: inventory_api::inventory::BatchError| match err.source {
        ServiceError::Validation { field, .. } if err.stage == BatchStage::Validation => field,
        other => format!("unexpected: {}", other),
    };

    let empty = orchestrator.create_alta_batch(app.alta(vec![]), &app.actor).await;
    assert_eq!(empty.err().map(field_of).as_deref(), Some("articles"));

    let oversized = app.alta((0..101).map(|n| app.article(&format!("Item {}", n))).collect());
    let oversized = orchestrator.create_alta_batch(oversized, &app.actor).await;
    assert_eq!(oversized.err().map(field_of).as_deref(), Some("articles"));

    let mut no_file = app.alta(vec![app.article("Fan")]);
    no_file.file = None;
    let no_file = orchestrator.create_alta_batch(no_file, &app.actor).await;
    assert_eq!(no_file.err().map(field_of).as_deref(), Some("file"));

    let mut wrong_type = app.alta(vec![app.article("Fan")]);
    wrong_type.file = Some(FileUpload::new(b"MZ".to_vec(), "setup.exe", "application/x-msdownload"));
    let wrong_type = orchestrator.create_alta_batch(wrong_type, &app.actor).await;
    assert_eq!(wrong_type.err().map(field_of).as_deref(), Some("file"));

    let mut too_big = app.alta(vec![app.article("Fan")]);
    too_big.file = Some(FileUpload::new(vec![0u8; 10 * 1024 * 1024 + 1], "scan.pdf", "application/pdf"));
    let too_big = orchestrator.create_alta_batch(too_big, &app.actor).await;
    assert_eq!(too_big.err().map(field_of).as_deref(), Some("file"));

    let mut mismatched = app.alta(vec![app.article("Fan")]);
    mismatched.catalog_type_id = app.catalogs.baja_type;
    let mismatched = orchestrator.create_alta_batch(mismatched, &app.actor).await;
    assert_eq!(mismatched.err().map(field_of).as_deref(), Some("catalog_type_id"));

    let duplicated = orchestrator.create_baja_batch(app.baja(vec![1, 1]), &app.actor).await;
    assert_eq!(duplicated.err().map(field_of).as_deref(), Some("article_ids"));

    let mut unknown_type = app.alta(vec![app.article("Fan")]);
    unknown_type.catalog_type_id = 999;
    let unknown_type = orchestrator.create_alta_batch(unknown_type, &app.actor).await;
    assert_eq!(unknown_type.err().map(|e| e.kind()), Some("not_found"));

    assert_eq!(count(&app, ARTICLE).await?, 0);
    assert!(app.audit_rows().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn expired_session_aborts_the_batch() -> Result<()> {
    let app = setup().await?;
    let expired = inventory_api::session::open_session(&app.db, 42, chrono::Duration::minutes(-5)).await?;
    let actor = inventory_api::audit::Actor::new(42, expired.id_session);

    let err = app
        .state
        .orchestrator
        .create_alta_batch(app.alta(vec![app.article("Heater")]), &actor)
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("batch ran without a live session"))?;

    assert_eq!(err.stage, BatchStage::Articles);
    assert_eq!(err.kind(), "unauthenticated");
    assert_eq!(count(&app, ARTICLE).await?, 0);
    assert!(app.stored_files("intake").is_empty());
    Ok(())
}
