use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::database::{Row, StoreError};
use crate::identity::IdentityError;

/// Columns every table carries that only the server may write.
pub const SYSTEM_FIELDS: &[&str] = &["active", "created_by", "created_at", "updated_by", "updated_at"];

/// A persisted table type served by `RecordService`.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: &'static str;

    /// Explicit key column; `None` leaves it to the naming convention.
    const PRIMARY_KEY: Option<&'static str> = None;

    /// Whether single-record mutations write an audit entry.
    const AUDITED: bool = true;

    /// Attributes that must be present and non-null on create.
    const REQUIRED: &'static [&'static str] = &[];

    fn to_row(&self) -> Result<Row, RecordError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(RecordError::Unknown(format!("{} did not serialize to an object", Self::TABLE))),
            Err(e) => Err(RecordError::Unknown(e.to_string())),
        }
    }

    fn from_row(row: Row) -> Result<Self, RecordError> {
        serde_json::from_value(Value::Object(row))
            .map_err(|e| RecordError::Unknown(format!("failed to decode {} row: {}", Self::TABLE, e)))
    }
}

/// Errors surfaced by the record layer. Storage codes are translated here and
/// never passed upward raw.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Unique constraint violated on field '{0}'")]
    UniqueConstraintViolated(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: i64 },

    #[error("Foreign key violated on field '{0}'")]
    ForeignKeyViolated(String),

    #[error("Missing required field: {0}")]
    RequiredFieldMissing(String),

    #[error("System field '{0}' cannot be set via API input")]
    SystemFieldNotAllowed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No active session; mutation refused")]
    Unauthenticated,

    #[error("Operation timed out")]
    Timeout,

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<StoreError> for RecordError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(field) => RecordError::UniqueConstraintViolated(field),
            StoreError::ForeignKeyViolation(field) => RecordError::ForeignKeyViolated(field),
            StoreError::NotNullViolation(field) => RecordError::RequiredFieldMissing(field),
            StoreError::InvalidQuery(msg) => RecordError::InvalidInput(msg),
            StoreError::Timeout => RecordError::Timeout,
            other => RecordError::Unknown(other.to_string()),
        }
    }
}

impl From<IdentityError> for RecordError {
    fn from(err: IdentityError) -> Self {
        RecordError::Unknown(err.to_string())
    }
}

pub fn is_active(row: &Row) -> bool {
    row.get("active") == Some(&Value::Bool(true))
}

/// A table row with change tracking: `original` is the stored state (absent on
/// create) and `fields` the state about to be written.
#[derive(Debug, Clone, Default)]
pub struct Record {
    original: Option<Row>,
    fields: Row,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a record from client input. System columns and the key are rejected.
    pub fn from_input(json: Value, key: &str) -> Result<Self, RecordError> {
        match json {
            Value::Object(map) => {
                for field in map.keys() {
                    if SYSTEM_FIELDS.contains(&field.as_str()) || field == key {
                        return Err(RecordError::SystemFieldNotAllowed(field.clone()));
                    }
                }
                Ok(Self { original: None, fields: map })
            }
            _ => Err(RecordError::InvalidInput("Expected JSON object".to_string())),
        }
    }

    /// Wraps a stored row so later `set` calls are tracked against it.
    pub fn from_row(row: Row) -> Self {
        Self { original: Some(row.clone()), fields: row }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Text value of a field, treating null and blank as absent.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
    }

    /// Set an attribute. System columns are ignored with a warning.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        if SYSTEM_FIELDS.contains(&key.as_str()) {
            tracing::warn!("Attempted to set system field '{}' - ignoring", key);
            return self;
        }
        self.fields.insert(key, value.into());
        self
    }

    pub fn set_system_field(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Overlays client input onto this record.
    pub fn apply(&mut self, input: Record) -> &mut Self {
        for (key, value) in input.fields {
            self.set(key, value);
        }
        self
    }

    pub fn stamp_created(&mut self, actor_id: i64, now: DateTime<Utc>) -> &mut Self {
        self.set_system_field("active", true)
            .set_system_field("created_by", actor_id)
            .set_system_field("created_at", now.to_rfc3339())
    }

    pub fn stamp_updated(&mut self, actor_id: i64, now: DateTime<Utc>) -> &mut Self {
        self.set_system_field("updated_by", actor_id)
            .set_system_field("updated_at", now.to_rfc3339())
    }

    pub fn is_active(&self) -> bool {
        is_active(&self.fields)
    }

    /// First required field that is missing or null.
    pub fn missing_required<'a>(&self, required: &[&'a str]) -> Option<&'a str> {
        required.iter().copied().find(|field| self.get(field).map_or(true, Value::is_null))
    }

    /// Fields whose value differs from the original, in key order.
    pub fn changed_fields(&self) -> Vec<String> {
        match &self.original {
            Some(original) => self
                .fields
                .iter()
                .filter(|(k, v)| original.get(k.as_str()) != Some(*v))
                .map(|(k, _)| k.clone())
                .collect(),
            None => self.fields.keys().cloned().collect(),
        }
    }

    /// The subset of fields to write for an update.
    pub fn changes(&self) -> Row {
        self.changed_fields()
            .into_iter()
            .filter_map(|k| self.fields.get(&k).map(|v| (k, v.clone())))
            .collect()
    }

    pub fn original(&self) -> Option<&Row> {
        self.original.as_ref()
    }

    pub fn into_row(self) -> Row {
        self.fields
    }
}
