use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::database::{StoreError, Table, Transaction};
use crate::record::RecordError;

pub const SEQUENCE_DIGITS: usize = 7;
pub const MAX_SEQUENCE: u32 = 9_999_999;

#[derive(Debug, Error)]
pub enum FolioError {
    #[error("Invalid folio prefix '{0}': expected 1-10 ASCII letters or digits")]
    InvalidPrefix(String),

    #[error("Invalid folio year {0}")]
    InvalidYear(i32),

    #[error("Malformed folio '{0}'")]
    Malformed(String),

    #[error("Folio sequence {prefix}-{year} is exhausted")]
    Exhausted { prefix: String, year: i32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A parsed `{PREFIX}-{YYYY}-{NNNNNNN}` identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Folio {
    pub prefix: String,
    pub year: i32,
    pub sequence: u32,
}

impl Folio {
    pub fn new(prefix: &str, year: i32, sequence: u32) -> Result<Self, FolioError> {
        let prefix = validate_prefix(prefix)?;
        validate_year(year)?;
        if sequence == 0 || sequence > MAX_SEQUENCE {
            return Err(FolioError::Exhausted { prefix, year });
        }
        Ok(Self { prefix, year, sequence })
    }

    /// Scope used for locking and for the max-lookup, e.g. `INV-2025-`.
    pub fn scope(prefix: &str, year: i32) -> String {
        format!("{}-{:04}-", prefix, year)
    }
}

impl fmt::Display for Folio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:04}-{:0width$}", self.prefix, self.year, self.sequence, width = SEQUENCE_DIGITS)
    }
}

impl FromStr for Folio {
    type Err = FolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || FolioError::Malformed(s.to_string());
        let mut parts = s.rsplitn(3, '-');
        let (Some(seq), Some(year), Some(prefix)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed());
        };
        if seq.len() != SEQUENCE_DIGITS || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let year: i32 = year.parse().map_err(|_| malformed())?;
        let sequence: u32 = seq.parse().map_err(|_| malformed())?;
        Folio::new(prefix, year, sequence).map_err(|_| malformed())
    }
}

pub fn format(prefix: &str, year: i32, sequence: u32) -> Result<String, FolioError> {
    Ok(Folio::new(prefix, year, sequence)?.to_string())
}

pub fn parse(folio: &str) -> Result<Folio, FolioError> {
    folio.parse()
}

fn validate_prefix(prefix: &str) -> Result<String, FolioError> {
    let valid = !prefix.is_empty() && prefix.len() <= 10 && prefix.bytes().all(|b| b.is_ascii_alphanumeric());
    if valid {
        Ok(prefix.to_ascii_uppercase())
    } else {
        Err(FolioError::InvalidPrefix(prefix.to_string()))
    }
}

fn validate_year(year: i32) -> Result<(), FolioError> {
    if (1000..=9999).contains(&year) { Ok(()) } else { Err(FolioError::InvalidYear(year)) }
}

/// Allocates folios inside the caller's transaction.
///
/// Allocation first takes an exclusive lock scoped to `(prefix, year)`, so two
/// concurrent batches serialize on the read-max-then-increment step; the unique
/// index on the folio column backs that up.
#[derive(Debug, Clone)]
pub struct FolioSequencer {
    table: String,
    key: String,
    column: String,
}

impl FolioSequencer {
    pub fn new(table: impl Into<String>, key: impl Into<String>, column: impl Into<String>) -> Self {
        Self { table: table.into(), key: key.into(), column: column.into() }
    }

    pub async fn next(&self, tx: &mut dyn Transaction, prefix: &str, year: i32) -> Result<String, FolioError> {
        let mut folios = self.next_batch(tx, prefix, year, 1).await?;
        folios.pop().ok_or_else(|| FolioError::Exhausted { prefix: prefix.to_string(), year })
    }

    /// Returns `count` contiguous folios in ascending order.
    pub async fn next_batch(&self, tx: &mut dyn Transaction, prefix: &str, year: i32, count: usize) -> Result<Vec<String>, FolioError> {
        let prefix = validate_prefix(prefix)?;
        validate_year(year)?;
        if count == 0 {
            return Ok(vec![]);
        }

        let scope = Folio::scope(&prefix, year);
        tx.lock_key(&format!("folio:{}", scope)).await?;

        let table = Table::new(&self.table, &self.key);
        let current = match tx.max_value(table, &self.column, &scope).await? {
            Some(max) => parse(&max)?.sequence,
            None => 0,
        };

        let last = current as u64 + count as u64;
        if last > MAX_SEQUENCE as u64 {
            return Err(FolioError::Exhausted { prefix, year });
        }

        debug!(scope = %scope, from = current + 1, count, "Allocated folios");
        ((current + 1)..=(last as u32))
            .map(|sequence| format(&prefix, year, sequence))
            .collect()
    }
}

impl From<FolioError> for RecordError {
    fn from(err: FolioError) -> Self {
        match err {
            FolioError::Store(e) => e.into(),
            FolioError::Malformed(folio) => RecordError::InvalidInput(format!("malformed folio '{}'", folio)),
            other => RecordError::Unknown(other.to_string()),
        }
    }
}
