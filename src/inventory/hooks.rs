use async_trait::async_trait;
use chrono::{Datelike, Utc};

use super::models::Article;
use crate::audit::Actor;
use crate::database::UnitOfWork;
use crate::folio::{self, FolioSequencer};
use crate::record::{Record, RecordError};
use crate::service::RecordHooks;

/// Fills server-owned article attributes before insert: the default location
/// and a folio, either normalised from the caller or freshly allocated.
#[derive(Debug, Clone)]
pub struct ArticleHooks {
    folio: FolioSequencer,
    prefix: String,
    default_location: String,
}

impl ArticleHooks {
    pub fn new(folio: FolioSequencer, prefix: impl Into<String>, default_location: impl Into<String>) -> Self {
        Self { folio, prefix: prefix.into(), default_location: default_location.into() }
    }

    pub fn sequencer(&self) -> &FolioSequencer {
        &self.folio
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Sets the default location and normalises a caller-supplied folio.
    /// Returns whether the record still needs one allocated.
    fn prepare(&self, record: &mut Record) -> Result<bool, RecordError> {
        if record.text("location").is_none() {
            record.set("location", self.default_location.clone());
        }

        let Some(given) = record.text("folio") else {
            return Ok(true);
        };
        let folio = folio::parse(&given.to_ascii_uppercase())
            .map_err(|_| RecordError::InvalidInput(format!("malformed folio '{}'", given)))?
            .to_string();
        record.set("folio", folio);
        Ok(false)
    }
}

#[async_trait]
impl RecordHooks<Article> for ArticleHooks {
    async fn pre_create(&self, uow: &mut UnitOfWork, record: &mut Record, _actor: &Actor) -> Result<(), RecordError> {
        if self.prepare(record)? {
            let folio = self.folio.next(&mut **uow, &self.prefix, Utc::now().year()).await?;
            record.set("folio", folio);
        }
        Ok(())
    }

    async fn pre_create_many(&self, uow: &mut UnitOfWork, records: &mut [Record], _actor: &Actor) -> Result<(), RecordError> {
        let mut pending = Vec::new();
        for (index, record) in records.iter_mut().enumerate() {
            if self.prepare(record)? {
                pending.push(index);
            }
        }

        let folios = self
            .folio
            .next_batch(&mut **uow, &self.prefix, Utc::now().year(), pending.len())
            .await?;
        for (index, folio) in pending.into_iter().zip(folios) {
            records[index].set("folio", folio);
        }
        Ok(())
    }
}
