use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::warn;

use crate::filter::is_valid_identifier;
use crate::record::Entity;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid table name: {0}")]
    InvalidTable(String),

    #[error("Table '{table}' matches no naming convention and has no registered key (would guess '{guess}')")]
    Unregistered { table: String, guess: String },
}

/// Table-name prefixes the schema follows.
#[derive(Debug, Clone)]
pub struct NamingConvention {
    pub id_prefix: String,
    pub relation_prefix: String,
    pub fact_prefix: String,
    pub catalog_prefix: String,
    /// Stripped after the catalog prefix, e.g. `ct_inventory_brand` -> `brand`.
    pub domain_prefixes: Vec<String>,
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self {
            id_prefix: "id_".to_string(),
            relation_prefix: "rel_".to_string(),
            fact_prefix: "tr_".to_string(),
            catalog_prefix: "ct_".to_string(),
            domain_prefixes: vec!["infrastructure_".to_string(), "inventory_".to_string()],
        }
    }
}

impl NamingConvention {
    /// The table's subject with all known prefixes removed, or `None` when no prefix matches.
    pub fn subject<'a>(&self, table: &'a str) -> Option<&'a str> {
        if let Some(rest) = table.strip_prefix(self.relation_prefix.as_str()) {
            return Some(rest);
        }
        if let Some(rest) = table.strip_prefix(self.fact_prefix.as_str()) {
            return Some(rest);
        }
        if let Some(rest) = table.strip_prefix(self.catalog_prefix.as_str()) {
            let stripped = self
                .domain_prefixes
                .iter()
                .find_map(|domain| rest.strip_prefix(domain.as_str()))
                .unwrap_or(rest);
            return Some(stripped);
        }
        None
    }

    /// Human label used in audit summaries: `tr_operation_file` -> `operation file`.
    pub fn label(&self, table: &str) -> String {
        self.subject(table).unwrap_or(table).replace('_', " ")
    }
}

/// Maps table names to primary-key columns. Explicit registrations win; otherwise
/// the naming convention decides, and anything it cannot place is a fallback that
/// is logged and counted, or rejected outright in strict mode.
#[derive(Debug)]
pub struct IdentityResolver {
    convention: NamingConvention,
    overrides: HashMap<String, String>,
    entities: HashSet<String>,
    strict: bool,
    fallback_hits: AtomicU64,
}

impl IdentityResolver {
    pub fn new(strict: bool) -> Self {
        Self::with_convention(NamingConvention::default(), strict)
    }

    pub fn with_convention(convention: NamingConvention, strict: bool) -> Self {
        Self {
            convention,
            overrides: HashMap::new(),
            entities: HashSet::new(),
            strict,
            fallback_hits: AtomicU64::new(0),
        }
    }

    pub fn convention(&self) -> &NamingConvention {
        &self.convention
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn register(&mut self, table: impl Into<String>, key: impl Into<String>) -> &mut Self {
        self.overrides.insert(table.into(), key.into());
        self
    }

    /// Registers an entity's declared key, or checks that convention covers it.
    pub fn register_entity<E: Entity>(&mut self) -> Result<&mut Self, IdentityError> {
        match E::PRIMARY_KEY {
            Some(key) => {
                self.register(E::TABLE, key);
            }
            None => {
                self.resolve(E::TABLE)?;
            }
        }
        self.entities.insert(E::TABLE.to_string());
        Ok(self)
    }

    /// Whether `table` belongs to an entity registered with `register_entity`.
    pub fn is_entity(&self, table: &str) -> bool {
        self.entities.contains(table)
    }

    pub fn resolve(&self, table: &str) -> Result<String, IdentityError> {
        if !is_valid_identifier(table) {
            return Err(IdentityError::InvalidTable(table.to_string()));
        }
        if let Some(key) = self.overrides.get(table) {
            return Ok(key.clone());
        }
        if let Some(subject) = self.convention.subject(table) {
            return Ok(format!("{}{}", self.convention.id_prefix, subject));
        }

        let guess = format!("{}{}", self.convention.id_prefix, table);
        self.fallback_hits.fetch_add(1, Ordering::Relaxed);
        if self.strict {
            return Err(IdentityError::Unregistered { table: table.to_string(), guess });
        }
        warn!(table, key = %guess, "Primary key resolved by fallback; register an explicit key for this table");
        Ok(guess)
    }

    /// Resolves every table up front so configuration gaps surface at startup.
    pub fn verify<'a>(&self, tables: impl IntoIterator<Item = &'a str>) -> Result<(), IdentityError> {
        for table in tables {
            self.resolve(table)?;
        }
        Ok(())
    }

    /// How many lookups have used the fallback rule.
    pub fn fallback_hits(&self) -> u64 {
        self.fallback_hits.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convention_rules() {
        let resolver = IdentityResolver::new(false);
        assert_eq!(resolver.resolve("rel_operation_article").unwrap(), "id_operation_article");
        assert_eq!(resolver.resolve("tr_article").unwrap(), "id_article");
        assert_eq!(resolver.resolve("ct_inventory_brand").unwrap(), "id_brand");
        assert_eq!(resolver.resolve("ct_infrastructure_building").unwrap(), "id_building");
        assert_eq!(resolver.resolve("ct_status").unwrap(), "id_status");
        assert_eq!(resolver.fallback_hits(), 0);
    }

    #[test]
    fn override_wins() {
        let mut resolver = IdentityResolver::new(true);
        resolver.register("tr_article", "article_pk");
        assert_eq!(resolver.resolve("tr_article").unwrap(), "article_pk");
    }

    #[test]
    fn fallback_is_counted() {
        let resolver = IdentityResolver::new(false);
        assert_eq!(resolver.resolve("users").unwrap(), "id_users");
        assert_eq!(resolver.fallback_hits(), 1);
    }

    #[test]
    fn strict_mode_rejects_fallback() {
        let mut resolver = IdentityResolver::new(true);
        assert_eq!(
            resolver.resolve("users"),
            Err(IdentityError::Unregistered { table: "users".to_string(), guess: "id_users".to_string() })
        );
        resolver.register("users", "user_id");
        assert!(resolver.verify(["users", "tr_article"]).is_ok());
    }

    #[test]
    fn only_registered_entities_are_known() {
        let mut resolver = IdentityResolver::new(false);
        resolver.register_entity::<crate::session::Session>().unwrap();
        assert!(resolver.is_entity(crate::session::Session::TABLE));
        assert!(!resolver.is_entity("tr_anything"));
        assert!(!resolver.is_entity("users"));
        assert_eq!(resolver.fallback_hits(), 0);
    }

    #[test]
    fn labels_strip_prefixes() {
        let convention = NamingConvention::default();
        assert_eq!(convention.label("tr_operation_file"), "operation file");
        assert_eq!(convention.label("ct_inventory_operation_type"), "operation type");
        assert_eq!(convention.label("legacy"), "legacy");
    }
}
