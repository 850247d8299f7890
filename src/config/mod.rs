use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub filter: FilterConfig,
    pub audit: AuditConfig,
    pub inventory: InventoryConfig,
    pub storage: StorageConfig,
    pub security: SecurityConfig,
    pub sessions: SessionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `postgres://...` or `memory://`
    pub url: String,
    pub max_connections: u32,
    /// Bound on waiting for a connection when a transaction opens.
    pub acquire_timeout_ms: u64,
    /// Per-statement bound set with `SET LOCAL statement_timeout`; 0 disables.
    pub statement_timeout_ms: u64,
    /// Bound on a whole unit of work, start to commit.
    pub transaction_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub max_limit: Option<i64>,
    pub default_per_page: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Appended to the built-in denylist.
    pub excluded_fields: Vec<String>,
    /// Fail instead of warn when a table's key falls back to the naming heuristic.
    pub strict_identity: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    pub folio_prefix: String,
    pub default_location: String,
    pub max_batch: usize,
    pub max_upload_bytes: usize,
    pub allowed_mime_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub enable_cors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub sweep_interval_secs: u64,
}

fn csv(value: &str) -> Vec<String> {
    value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_ACQUIRE_TIMEOUT_MS") {
            self.database.acquire_timeout_ms = v.parse().unwrap_or(self.database.acquire_timeout_ms);
        }
        if let Ok(v) = env::var("DATABASE_STATEMENT_TIMEOUT_MS") {
            self.database.statement_timeout_ms = v.parse().unwrap_or(self.database.statement_timeout_ms);
        }
        if let Ok(v) = env::var("DATABASE_TRANSACTION_TIMEOUT_MS") {
            self.database.transaction_timeout_ms = v.parse().unwrap_or(self.database.transaction_timeout_ms);
        }

        // Filter overrides
        if let Ok(v) = env::var("FILTER_MAX_LIMIT") {
            self.filter.max_limit = v.parse().ok();
        }
        if let Ok(v) = env::var("FILTER_DEFAULT_PER_PAGE") {
            self.filter.default_per_page = v.parse().unwrap_or(self.filter.default_per_page);
        }

        // Audit overrides
        if let Ok(v) = env::var("AUDIT_EXCLUDED_FIELDS") {
            self.audit.excluded_fields = csv(&v);
        }
        if let Ok(v) = env::var("AUDIT_STRICT_IDENTITY") {
            self.audit.strict_identity = v.parse().unwrap_or(self.audit.strict_identity);
        }

        // Inventory overrides
        if let Ok(v) = env::var("INVENTORY_FOLIO_PREFIX") {
            self.inventory.folio_prefix = v;
        }
        if let Ok(v) = env::var("INVENTORY_DEFAULT_LOCATION") {
            self.inventory.default_location = v;
        }
        if let Ok(v) = env::var("INVENTORY_MAX_BATCH") {
            self.inventory.max_batch = v.parse().unwrap_or(self.inventory.max_batch);
        }
        if let Ok(v) = env::var("INVENTORY_MAX_UPLOAD_BYTES") {
            self.inventory.max_upload_bytes = v.parse().unwrap_or(self.inventory.max_upload_bytes);
        }
        if let Ok(v) = env::var("INVENTORY_ALLOWED_MIME_TYPES") {
            self.inventory.allowed_mime_types = csv(&v);
        }

        if let Ok(v) = env::var("STORAGE_ROOT") {
            self.storage.root = v;
        }

        // Security overrides
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }

        if let Ok(v) = env::var("SESSION_SWEEP_INTERVAL_SECS") {
            self.sessions.sweep_interval_secs = v.parse().unwrap_or(self.sessions.sweep_interval_secs);
        }

        self
    }

    fn inventory_defaults() -> InventoryConfig {
        InventoryConfig {
            folio_prefix: "INV".to_string(),
            default_location: "ALMACEN GENERAL".to_string(),
            max_batch: 100,
            max_upload_bytes: 10 * 1024 * 1024, // 10MB
            allowed_mime_types: vec![
                "application/pdf".to_string(),
                "image/jpeg".to_string(),
                "image/png".to_string(),
            ],
        }
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                url: "memory://".to_string(),
                max_connections: 10,
                acquire_timeout_ms: 30_000,
                statement_timeout_ms: 0,
                transaction_timeout_ms: 60_000,
            },
            filter: FilterConfig { max_limit: Some(1000), default_per_page: 25 },
            audit: AuditConfig { excluded_fields: vec![], strict_identity: false },
            inventory: Self::inventory_defaults(),
            storage: StorageConfig { root: "./storage".to_string() },
            security: SecurityConfig { jwt_secret: "development-secret".to_string(), enable_cors: true },
            sessions: SessionConfig { sweep_interval_secs: 300 },
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 20,
                acquire_timeout_ms: 10_000,
                statement_timeout_ms: 15_000,
                transaction_timeout_ms: 30_000,
            },
            filter: FilterConfig { max_limit: Some(500), default_per_page: 25 },
            audit: AuditConfig { excluded_fields: vec![], strict_identity: true },
            inventory: Self::inventory_defaults(),
            storage: StorageConfig { root: "/var/lib/inventory/files".to_string() },
            security: SecurityConfig { jwt_secret: String::new(), enable_cors: true },
            sessions: SessionConfig { sweep_interval_secs: 120 },
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 50,
                acquire_timeout_ms: 5_000,
                statement_timeout_ms: 10_000,
                transaction_timeout_ms: 20_000,
            },
            filter: FilterConfig { max_limit: Some(100), default_per_page: 25 },
            audit: AuditConfig { excluded_fields: vec![], strict_identity: true },
            inventory: InventoryConfig {
                max_upload_bytes: 5 * 1024 * 1024, // 5MB
                ..Self::inventory_defaults()
            },
            storage: StorageConfig { root: "/var/lib/inventory/files".to_string() },
            security: SecurityConfig { jwt_secret: String::new(), enable_cors: false },
            sessions: SessionConfig { sweep_interval_secs: 60 },
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}
