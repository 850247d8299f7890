use thiserror::Error;

use crate::filter::FilterError;

/// Errors raised by a storage backend. Backend-specific codes are folded into
/// these variants so callers see the same taxonomy for Postgres and memory.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unique constraint violated on '{0}'")]
    UniqueViolation(String),

    #[error("Foreign key violated: {0}")]
    ForeignKeyViolation(String),

    #[error("Column '{0}' cannot be null")]
    NotNullViolation(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Database operation timed out")]
    Timeout,

    #[error("Transaction already finished")]
    Closed,

    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<FilterError> for StoreError {
    fn from(err: FilterError) -> Self {
        StoreError::InvalidQuery(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(format!("row decoding failed: {}", err))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => StoreError::Timeout,
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
                let pg = db.try_downcast_ref::<sqlx::postgres::PgDatabaseError>();
                let detail = pg.and_then(|e| e.detail()).unwrap_or_default().to_string();
                let column = pg.and_then(|e| e.column()).map(str::to_string);
                let constraint = db.constraint().map(str::to_string);

                match code.as_str() {
                    "23505" => StoreError::UniqueViolation(
                        key_from_detail(&detail).or(constraint).unwrap_or_else(|| "unknown".to_string()),
                    ),
                    "23503" => StoreError::ForeignKeyViolation(
                        key_from_detail(&detail).or(constraint).unwrap_or_else(|| db.message().to_string()),
                    ),
                    "23502" => StoreError::NotNullViolation(column.unwrap_or_else(|| "unknown".to_string())),
                    "57014" => StoreError::Timeout,
                    "42703" | "22P02" => StoreError::InvalidQuery(db.message().to_string()),
                    _ => StoreError::Backend(db.message().to_string()),
                }
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Extracts the column list from a Postgres detail such as `Key (folio)=(INV-2025-0000001) already exists.`
pub fn key_from_detail(detail: &str) -> Option<String> {
    let start = detail.find("Key (")? + "Key (".len();
    let end = detail[start..].find(")=")?;
    Some(detail[start..start + end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unique_detail() {
        assert_eq!(
            key_from_detail("Key (folio)=(INV-2025-0000001) already exists."),
            Some("folio".to_string())
        );
        assert_eq!(
            key_from_detail("Key (id_brand)=(99) is not present in table \"ct_inventory_brand\"."),
            Some("id_brand".to_string())
        );
        assert_eq!(key_from_detail("no detail"), None);
    }
}
