use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::audit::{AuditRecorder, AUDIT_TABLE};
use crate::config::AppConfig;
use crate::database::Database;
use crate::identity::{IdentityError, IdentityResolver};
use crate::inventory::{
    Article, AttachedFile, Catalog, InventoryOrchestrator, OperationArticleLink, OperationHeader,
};
use crate::record::RecordError;
use crate::service::ServiceContext;
use crate::session::Session;
use crate::storage::FileStore;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Identity configuration error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Service wiring error: {0}")]
    Service(#[from] RecordError),
}

/// Everything a request handler needs, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Database,
    pub identity: Arc<IdentityResolver>,
    pub audit: Arc<AuditRecorder>,
    pub orchestrator: Arc<InventoryOrchestrator>,
}

impl AppState {
    pub fn build(config: AppConfig, db: Database, file_store: Arc<dyn FileStore>) -> Result<Self, StartupError> {
        let identity = Arc::new(identity_resolver(config.audit.strict_identity)?);
        let audit = Arc::new(AuditRecorder::new(identity.clone(), &config.audit.excluded_fields));

        let ctx = ServiceContext {
            db: db.clone(),
            identity: identity.clone(),
            audit: audit.clone(),
            filter: config.filter.clone(),
        };
        let orchestrator = Arc::new(InventoryOrchestrator::new(ctx, file_store, config.inventory.clone())?);

        info!(backend = db.backend(), strict_identity = identity.is_strict(), "Application state ready");
        Ok(Self { config: Arc::new(config), db, identity, audit, orchestrator })
    }
}

/// Registers every table the service touches and resolves them all, so a key
/// that would fall back to guessing fails here rather than on first write.
pub fn identity_resolver(strict: bool) -> Result<IdentityResolver, IdentityError> {
    let mut identity = IdentityResolver::new(strict);
    identity
        .register_entity::<Session>()?
        .register_entity::<Article>()?
        .register_entity::<OperationHeader>()?
        .register_entity::<OperationArticleLink>()?
        .register_entity::<AttachedFile>()?;

    let catalogs = [
        Catalog::ArticleType,
        Catalog::Brand,
        Catalog::Material,
        Catalog::Color,
        Catalog::Supplier,
        Catalog::Condition,
        Catalog::OperationType,
    ];
    identity.verify(catalogs.iter().map(|c| c.table()).chain([AUDIT_TABLE]))?;
    Ok(identity)
}
