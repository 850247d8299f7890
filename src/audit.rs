use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::database::{ListQuery, Row, Table, Transaction};
use crate::filter::SortDirection;
use crate::identity::IdentityResolver;
use crate::record::RecordError;

pub const AUDIT_TABLE: &str = "tr_audit_log";
pub const SESSION_TABLE: &str = "tr_session";

/// Fields never copied into an audit snapshot.
pub const DEFAULT_EXCLUDED_FIELDS: &[&str] = &[
    "password",
    "password_hash",
    "token",
    "refresh_token",
    "secret",
    "api_key",
    "created_by",
    "created_at",
    "updated_by",
    "updated_at",
];

/// Text values longer than this are treated as blobs and left out of snapshots.
const MAX_SNAPSHOT_TEXT: usize = 4096;

/// The authenticated caller behind a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: i64,
    pub session_id: i64,
}

impl Actor {
    pub fn new(user_id: i64, session_id: i64) -> Self {
        Self { user_id, session_id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            AuditAction::Create => "Created",
            AuditAction::Update => "Updated",
            AuditAction::Delete => "Deleted",
        }
    }
}

/// One mutation to record. `record_id` may be omitted when the snapshots carry the key.
#[derive(Debug, Clone)]
pub struct AuditEvent<'a> {
    pub action: AuditAction,
    pub table: &'a str,
    pub record_id: Option<i64>,
    pub before: Option<&'a Row>,
    pub after: Option<&'a Row>,
    pub actor: &'a Actor,
}

impl<'a> AuditEvent<'a> {
    pub fn created(table: &'a str, after: &'a Row, actor: &'a Actor) -> Self {
        Self { action: AuditAction::Create, table, record_id: None, before: None, after: Some(after), actor }
    }

    pub fn updated(table: &'a str, before: &'a Row, after: &'a Row, actor: &'a Actor) -> Self {
        Self { action: AuditAction::Update, table, record_id: None, before: Some(before), after: Some(after), actor }
    }

    pub fn deleted(table: &'a str, before: &'a Row, actor: &'a Actor) -> Self {
        Self { action: AuditAction::Delete, table, record_id: None, before: Some(before), after: None, actor }
    }

    pub fn with_record_id(mut self, id: i64) -> Self {
        self.record_id = Some(id);
        self
    }
}

/// A stored audit row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id_audit_log: i64,
    pub table_name: String,
    pub action: AuditAction,
    pub record_id: i64,
    pub actor_id: i64,
    pub session_id: i64,
    #[serde(default)]
    pub before_state: Option<Value>,
    #[serde(default)]
    pub after_state: Option<Value>,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

/// Writes audit entries inside the caller's transaction. It never opens or
/// commits a transaction itself, so an audit failure aborts the mutation with it.
pub struct AuditRecorder {
    identity: Arc<IdentityResolver>,
    excluded: HashSet<String>,
}

impl AuditRecorder {
    pub fn new(identity: Arc<IdentityResolver>, extra_excluded: &[String]) -> Self {
        let excluded = DEFAULT_EXCLUDED_FIELDS
            .iter()
            .map(|f| f.to_string())
            .chain(extra_excluded.iter().map(|f| f.to_lowercase()))
            .collect();
        Self { identity, excluded }
    }

    pub async fn record(&self, tx: &mut dyn Transaction, event: AuditEvent<'_>) -> Result<(), RecordError> {
        self.require_session(tx, event.actor).await?;

        let record_id = match event.record_id {
            Some(id) => id,
            None => {
                let key = self.identity.resolve(event.table)?;
                event
                    .after
                    .or(event.before)
                    .and_then(|row| row.get(&key))
                    .and_then(Value::as_i64)
                    .ok_or_else(|| RecordError::Unknown(format!("audited row of {} has no '{}'", event.table, key)))?
            }
        };

        let before = event.before.map(|row| self.project(row));
        let after = match event.action {
            AuditAction::Delete => Some(Row::from_iter([("active".to_string(), Value::Bool(false))])),
            _ => event.after.map(|row| self.project(row)),
        };
        let summary = self.summarize(event.action, event.table, record_id, before.as_ref(), after.as_ref());

        let mut entry = Row::new();
        entry.insert("table_name".into(), event.table.into());
        entry.insert("action".into(), event.action.as_str().into());
        entry.insert("record_id".into(), record_id.into());
        entry.insert("actor_id".into(), event.actor.user_id.into());
        entry.insert("session_id".into(), event.actor.session_id.into());
        entry.insert("before_state".into(), before.map(Value::Object).unwrap_or(Value::Null));
        entry.insert("after_state".into(), after.map(Value::Object).unwrap_or(Value::Null));
        entry.insert("summary".into(), summary.clone().into());
        entry.insert("active".into(), true.into());
        entry.insert("created_at".into(), Utc::now().to_rfc3339().into());

        let key = self.identity.resolve(AUDIT_TABLE)?;
        tx.insert(Table::new(AUDIT_TABLE, &key), entry).await?;
        debug!(table = event.table, record_id, action = event.action.as_str(), "{}", summary);
        Ok(())
    }

    /// Entries for one record, oldest first.
    pub async fn history(&self, tx: &mut dyn Transaction, table: &str, record_id: i64) -> Result<Vec<AuditEntry>, RecordError> {
        let key = self.identity.resolve(AUDIT_TABLE)?;
        let query = ListQuery::new()
            .eq("table_name", table)
            .eq("record_id", record_id)
            .include_inactive(true)
            .order_by(key.clone(), SortDirection::Asc);
        let rows = tx.select(Table::new(AUDIT_TABLE, &key), &query).await?;
        rows.into_iter()
            .map(|row| {
                serde_json::from_value(Value::Object(row))
                    .map_err(|e| RecordError::Unknown(format!("failed to decode audit entry: {}", e)))
            })
            .collect()
    }

    /// Fails closed unless the actor's session exists, is active, belongs to the
    /// actor and has not expired.
    async fn require_session(&self, tx: &mut dyn Transaction, actor: &Actor) -> Result<(), RecordError> {
        let key = self.identity.resolve(SESSION_TABLE)?;
        let session = tx.fetch(Table::new(SESSION_TABLE, &key), actor.session_id, false).await?;

        let valid = session.as_ref().map_or(false, |s| {
            let active = s.get("active") == Some(&Value::Bool(true));
            let owner = s.get("user_id").and_then(Value::as_i64) == Some(actor.user_id);
            let unexpired = s
                .get("expires_at")
                .and_then(Value::as_str)
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map_or(false, |t| t.with_timezone(&Utc) > Utc::now());
            active && owner && unexpired
        });

        if !valid {
            warn!(user_id = actor.user_id, session_id = actor.session_id, "Audit refused: no valid session");
            return Err(RecordError::Unauthenticated);
        }
        Ok(())
    }

    /// Copies a row minus excluded fields, nested objects/arrays and oversized text.
    pub fn project(&self, row: &Row) -> Row {
        row.iter()
            .filter(|(k, _)| !self.excluded.contains(&k.to_lowercase()))
            .filter(|(_, v)| match v {
                Value::Object(_) | Value::Array(_) => false,
                Value::String(s) => s.len() <= MAX_SNAPSHOT_TEXT,
                _ => true,
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn summarize(&self, action: AuditAction, table: &str, record_id: i64, before: Option<&Row>, after: Option<&Row>) -> String {
        let label = self.identity.convention().label(table);
        let display = after
            .and_then(display_value)
            .or_else(|| before.and_then(display_value))
            .map(|name| format!("'{}'", name))
            .unwrap_or_else(|| format!("#{}", record_id));

        let mut summary = format!("{} {} {}", action.verb(), label, display);
        if action == AuditAction::Update {
            let changed = changed_fields(before, after);
            if !changed.is_empty() {
                summary.push_str(": ");
                summary.push_str(&changed.join(", "));
            }
        }
        summary
    }
}

fn display_value(row: &Row) -> Option<String> {
    ["name", "description"]
        .iter()
        .filter_map(|f| row.get(*f).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn changed_fields(before: Option<&Row>, after: Option<&Row>) -> Vec<String> {
    let Some(after) = after else { return vec![] };
    after
        .iter()
        .filter(|(k, v)| before.and_then(|b| b.get(k.as_str())) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect()
}
