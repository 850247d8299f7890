use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::service::ServiceError;

/// Step of a batch submission, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStage {
    Validation,
    Articles,
    Header,
    Links,
    File,
    Commit,
}

impl BatchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStage::Validation => "validation",
            BatchStage::Articles => "articles",
            BatchStage::Header => "header",
            BatchStage::Links => "links",
            BatchStage::File => "file",
            BatchStage::Commit => "commit",
        }
    }
}

impl fmt::Display for BatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed submission. Nothing of it was committed.
#[derive(Debug, Error)]
#[error("batch failed at {stage}: {source}")]
pub struct BatchError {
    pub stage: BatchStage,
    pub source: ServiceError,
}

impl BatchError {
    pub fn new(stage: BatchStage, source: impl Into<ServiceError>) -> Self {
        Self { stage, source: source.into() }
    }

    pub fn rejected(source: impl Into<ServiceError>) -> Self {
        Self::new(BatchStage::Validation, source)
    }

    pub fn kind(&self) -> &'static str {
        self.source.kind()
    }
}
