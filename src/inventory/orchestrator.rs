use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{Datelike, Utc};
use futures::future::try_join_all;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::{BatchError, BatchStage};
use super::hooks::ArticleHooks;
use super::models::{
    AltaInput, Article, ArticleInput, AttachedFile, BajaInput, BatchResult, Catalog, OperationArticleLink,
    OperationHeader, OperationKind,
};
use crate::audit::Actor;
use crate::config::InventoryConfig;
use crate::database::{Row, Table, UnitOfWork};
use crate::folio::FolioSequencer;
use crate::record::{is_active, Entity, RecordError};
use crate::service::{RecordService, ServiceContext, ServiceError};
use crate::storage::{FileStore, FileUpload, StorageError};

/// Where a submission got to, and the stored file to clean up if it fails.
/// The path is set before the bytes are written; a write still in flight when
/// the submission is abandoned is held in `pending_write`.
#[derive(Debug)]
struct Progress {
    stage: BatchStage,
    stored_path: Option<String>,
    pending_write: Option<JoinHandle<Result<(), StorageError>>>,
}

impl Progress {
    fn new() -> Self {
        Self { stage: BatchStage::Validation, stored_path: None, pending_write: None }
    }
}

/// Runs Alta and Baja submissions. Each submission is one unit of work: the
/// articles, the header, the links, the file row and every audit entry commit
/// together or not at all. The file bytes are the one write outside the
/// transaction and are deleted again on any failure.
pub struct InventoryOrchestrator {
    ctx: ServiceContext,
    articles: RecordService<Article, ArticleHooks>,
    headers: RecordService<OperationHeader>,
    links: RecordService<OperationArticleLink>,
    files: RecordService<AttachedFile>,
    folios: FolioSequencer,
    file_store: Arc<dyn FileStore>,
    settings: InventoryConfig,
}

impl InventoryOrchestrator {
    pub fn new(ctx: ServiceContext, file_store: Arc<dyn FileStore>, settings: InventoryConfig) -> Result<Self, RecordError> {
        let article_key = ctx.identity.resolve(Article::TABLE)?;
        let folios = FolioSequencer::new(Article::TABLE, article_key, "folio");
        let hooks = ArticleHooks::new(folios.clone(), settings.folio_prefix.clone(), settings.default_location.clone());

        Ok(Self {
            articles: RecordService::with_hooks(ctx.clone(), hooks)?,
            headers: RecordService::new(ctx.clone())?,
            links: RecordService::new(ctx.clone())?,
            files: RecordService::new(ctx.clone())?,
            folios,
            file_store,
            settings,
            ctx,
        })
    }

    /// The article service this orchestrator writes through.
    pub fn articles(&self) -> &RecordService<Article, ArticleHooks> {
        &self.articles
    }

    pub async fn create_alta_batch(&self, input: AltaInput, actor: &Actor) -> Result<BatchResult, BatchError> {
        self.check_size("articles", input.articles.len()).map_err(BatchError::rejected)?;
        let file = self.check_file(input.file.as_ref()).map_err(BatchError::rejected)?;
        futures::try_join!(
            self.check_operation_type(input.catalog_type_id, OperationKind::Alta),
            self.check_article_catalogs(&input.articles),
        )
        .map_err(BatchError::rejected)?;

        let mut progress = Progress::new();
        let outcome = self.ctx.db.bounded(self.run_alta(&input, file, actor, &mut progress)).await;
        self.finish(outcome, progress).await
    }

    pub async fn create_baja_batch(&self, input: BajaInput, actor: &Actor) -> Result<BatchResult, BatchError> {
        self.check_size("article_ids", input.article_ids.len()).map_err(BatchError::rejected)?;
        let mut seen = HashSet::new();
        if let Some(dup) = input.article_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(BatchError::rejected(ServiceError::validation(
                "article_ids",
                format!("article {} is listed more than once", dup),
            )));
        }
        let file = self.check_file(input.file.as_ref()).map_err(BatchError::rejected)?;
        self.check_operation_type(input.catalog_type_id, OperationKind::Baja)
            .await
            .map_err(BatchError::rejected)?;

        let mut progress = Progress::new();
        let outcome = self.ctx.db.bounded(self.run_baja(&input, file, actor, &mut progress)).await;
        self.finish(outcome, progress).await
    }

    async fn run_alta(
        &self,
        input: &AltaInput,
        file: &FileUpload,
        actor: &Actor,
        progress: &mut Progress,
    ) -> Result<BatchResult, ServiceError> {
        let mut uow = self.ctx.db.begin().await?;

        progress.stage = BatchStage::Articles;
        let year = Utc::now().year();
        let folios = self
            .folios
            .next_batch(&mut *uow, &self.settings.folio_prefix, year, input.articles.len())
            .await?;

        let mut articles = Vec::with_capacity(input.articles.len());
        for (index, (article, folio)) in input.articles.iter().zip(folios).enumerate() {
            let mut record = article.to_record(self.articles.key()).map_err(|e| at_article(index, e))?;
            record.set("folio", folio);
            let created = self.articles.create_in(&mut uow, record, actor).await.map_err(|e| at_article(index, e))?;
            debug!(index, folio = %created.folio, "Article created");
            articles.push(created);
        }

        let kind = OperationKind::Alta;
        let (header, links) = self
            .open_operation(&mut uow, kind, input.catalog_type_id, input.observations.as_deref(), &articles, actor, progress)
            .await?;
        let file = self.register_file(&mut uow, kind, &header, file, actor, progress).await?;

        progress.stage = BatchStage::Commit;
        uow.commit().await?;
        info!(operation = header.id_operation, articles = articles.len(), "Alta batch committed");

        let summary = summarize(kind, &header, &articles);
        Ok(BatchResult { header, articles, links, file, summary })
    }

    async fn run_baja(
        &self,
        input: &BajaInput,
        file: &FileUpload,
        actor: &Actor,
        progress: &mut Progress,
    ) -> Result<BatchResult, ServiceError> {
        let mut uow = self.ctx.db.begin().await?;

        progress.stage = BatchStage::Articles;
        let mut current = Vec::with_capacity(input.article_ids.len());
        for id in &input.article_ids {
            match self.articles.fetch_in(&mut uow, *id, true).await? {
                None => return Err(ServiceError::not_found("article", id)),
                Some(article) if !article.active => {
                    return Err(ServiceError::Conflict(format!(
                        "article {} ({}) is already decommissioned",
                        id, article.folio
                    )))
                }
                Some(article) => current.push(article),
            }
        }

        let kind = OperationKind::Baja;
        let (header, links) = self
            .open_operation(&mut uow, kind, input.catalog_type_id, input.observations.as_deref(), &current, actor, progress)
            .await?;

        progress.stage = BatchStage::Articles;
        let context = Row::from_iter([("id_operation".to_string(), Value::from(header.id_operation))]);
        let mut articles = Vec::with_capacity(current.len());
        for article in &current {
            let retired = self
                .articles
                .deactivate_in(&mut uow, article.id_article, context.clone(), actor)
                .await?;
            articles.push(retired);
        }

        let file = self.register_file(&mut uow, kind, &header, file, actor, progress).await?;

        progress.stage = BatchStage::Commit;
        uow.commit().await?;
        info!(operation = header.id_operation, articles = articles.len(), "Baja batch committed");

        let summary = summarize(kind, &header, &articles);
        Ok(BatchResult { header, articles, links, file, summary })
    }

    /// Header plus one link per article, in article order.
    #[allow(clippy::too_many_arguments)]
    async fn open_operation(
        &self,
        uow: &mut UnitOfWork,
        kind: OperationKind,
        operation_type: i64,
        observations: Option<&str>,
        articles: &[Article],
        actor: &Actor,
        progress: &mut Progress,
    ) -> Result<(OperationHeader, Vec<OperationArticleLink>), ServiceError> {
        progress.stage = BatchStage::Header;
        let header = self
            .headers
            .create_in(uow, OperationHeader::record(kind, operation_type, observations), actor)
            .await?;

        progress.stage = BatchStage::Links;
        let mut links = Vec::with_capacity(articles.len());
        for article in articles {
            let link = OperationArticleLink::record(header.id_operation, article.id_article);
            links.push(self.links.create_in(uow, link, actor).await?);
        }
        Ok((header, links))
    }

    /// Writes the bytes under `(domain, header id)` and records the file row.
    async fn register_file(
        &self,
        uow: &mut UnitOfWork,
        kind: OperationKind,
        header: &OperationHeader,
        upload: &FileUpload,
        actor: &Actor,
        progress: &mut Progress,
    ) -> Result<AttachedFile, ServiceError> {
        progress.stage = BatchStage::File;
        let stored = self.file_store.place(kind.storage_domain(), header.id_operation, upload)?;
        progress.stored_path = Some(stored.path.clone());

        let (store, target, bytes) = (self.file_store.clone(), stored.clone(), upload.bytes.clone());
        let write = progress
            .pending_write
            .insert(tokio::spawn(async move { store.write(&target, &bytes).await }));
        let written = write.await;
        progress.pending_write = None;
        written.map_err(|e| ServiceError::Internal(format!("attachment write aborted: {}", e)))??;

        let file = self
            .files
            .create_in(uow, AttachedFile::record(header.id_operation, upload, &stored), actor)
            .await?;
        Ok(file)
    }

    async fn finish(&self, outcome: Result<BatchResult, ServiceError>, progress: Progress) -> Result<BatchResult, BatchError> {
        let source = match outcome {
            Ok(result) => return Ok(result),
            Err(source) => source,
        };

        if let Some(pending) = progress.pending_write {
            debug!(stage = %progress.stage, "Waiting for an interrupted attachment write");
            if let Err(e) = pending.await {
                error!("Attachment write task failed: {}", e);
            }
        }
        if let Some(path) = progress.stored_path {
            warn!(path = %path, stage = %progress.stage, "Batch rolled back; deleting stored attachment");
            if let Err(e) = self.file_store.delete(&path).await {
                error!(path = %path, "Compensating delete failed: {}", e);
            }
        }
        Err(BatchError::new(progress.stage, source))
    }

    fn check_size(&self, field: &str, count: usize) -> Result<(), ServiceError> {
        let max = self.settings.max_batch;
        if count == 0 {
            return Err(ServiceError::validation(field, "at least one article is required"));
        }
        if count > max {
            return Err(ServiceError::validation(field, format!("at most {} articles per batch, got {}", max, count)));
        }
        Ok(())
    }

    fn check_file<'a>(&self, file: Option<&'a FileUpload>) -> Result<&'a FileUpload, ServiceError> {
        let file = file
            .filter(|f| !f.bytes.is_empty())
            .ok_or_else(|| ServiceError::validation("file", "a supporting document is required"))?;
        if file.size() > self.settings.max_upload_bytes {
            return Err(ServiceError::validation(
                "file",
                format!("{} bytes exceeds the {} byte limit", file.size(), self.settings.max_upload_bytes),
            ));
        }
        let allowed = &self.settings.allowed_mime_types;
        if !allowed.is_empty() && !allowed.iter().any(|m| m.eq_ignore_ascii_case(&file.mime_type)) {
            return Err(ServiceError::validation("file", format!("type '{}' is not accepted", file.mime_type)));
        }
        Ok(file)
    }

    /// The operation type must exist, be active and be of the submitted kind.
    async fn check_operation_type(&self, id: i64, kind: OperationKind) -> Result<(), ServiceError> {
        let catalog = Catalog::OperationType;
        let row = self
            .catalog_row(catalog, id)
            .await?
            .filter(is_active)
            .ok_or_else(|| ServiceError::not_found(catalog.label(), id))?;

        match row.get("kind").and_then(Value::as_str) {
            Some(k) if k == kind.as_str() => Ok(()),
            other => Err(ServiceError::validation(
                "catalog_type_id",
                format!("operation type {} is for '{}', not '{}'", id, other.unwrap_or("unknown"), kind),
            )),
        }
    }

    /// Checks every distinct catalog reference once, concurrently, before any
    /// transaction opens. Errors name the first article that used the id.
    async fn check_article_catalogs(&self, articles: &[ArticleInput]) -> Result<(), ServiceError> {
        let mut refs: BTreeMap<(Catalog, i64), String> = BTreeMap::new();
        for (index, article) in articles.iter().enumerate() {
            for (catalog, id) in article.catalog_refs() {
                refs.entry((catalog, id))
                    .or_insert_with(|| format!("articles[{}].{}", index, catalog.field()));
            }
        }

        let checks = refs.into_iter().map(|((catalog, id), field)| async move {
            match self.catalog_row(catalog, id).await? {
                Some(row) if is_active(&row) => Ok(()),
                _ => Err(ServiceError::validation(
                    field,
                    format!("{} {} does not exist or is inactive", catalog.label(), id),
                )),
            }
        });
        try_join_all(checks).await?;
        Ok(())
    }

    async fn catalog_row(&self, catalog: Catalog, id: i64) -> Result<Option<Row>, ServiceError> {
        let key = self.ctx.identity.resolve(catalog.table()).map_err(RecordError::from)?;
        let mut uow = self.ctx.db.begin().await?;
        let row = uow.fetch(Table::new(catalog.table(), &key), id, false).await?;
        uow.rollback().await?;
        Ok(row)
    }
}

/// Re-homes a field error onto the article that caused it.
fn at_article(index: usize, err: RecordError) -> ServiceError {
    match ServiceError::from(err) {
        ServiceError::Validation { field, reason } => {
            ServiceError::Validation { field: format!("articles[{}].{}", index, field), reason }
        }
        other => other,
    }
}

fn summarize(kind: OperationKind, header: &OperationHeader, articles: &[Article]) -> String {
    let verb = match kind {
        OperationKind::Alta => "registered",
        OperationKind::Baja => "decommissioned",
    };
    let noun = if articles.len() == 1 { "article" } else { "articles" };
    match (articles.first(), articles.last()) {
        (Some(first), Some(last)) if articles.len() > 1 => format!(
            "Operation #{} ({}): {} {} {} ({} .. {})",
            header.id_operation,
            kind,
            verb,
            articles.len(),
            noun,
            first.folio,
            last.folio
        ),
        (Some(only), _) => format!(
            "Operation #{} ({}): {} 1 {} ({})",
            header.id_operation, kind, verb, noun, only.folio
        ),
        _ => format!("Operation #{} ({}): no articles", header.id_operation, kind),
    }
}
