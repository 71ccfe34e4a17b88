//! Lead store contract, storage backends and retry utilities.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use leadsync_core::{CanonicalLead, Consultant, Enrichment, LeadId, NewLead, SourceLeadRow};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

mod memory;
mod postgres;

pub use memory::{InMemoryLeadStore, StoreOp};
pub use postgres::{PgLeadStore, MIGRATOR};

pub const CRATE_NAME: &str = "leadsync-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a lead with phone {phone} already exists")]
    ConstraintViolation { phone: String },
    #[error("lead store unavailable: {0}")]
    Unavailable(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid source mapping: {0}")]
    InvalidMapping(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

impl StoreError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            Self::Unavailable(_) => RetryDisposition::Retryable,
            _ => RetryDisposition::NonRetryable,
        }
    }
}

/// Column mapping for one channel's intake table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceColumns {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub vehicle_interest: Option<String>,
    pub consultant: String,
    pub classification: Option<String>,
    pub created_at: String,
    pub processed: String,
}

impl Default for SourceColumns {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            name: "name".to_string(),
            phone: "phone".to_string(),
            vehicle_interest: Some("vehicle_interest".to_string()),
            consultant: "consultant".to_string(),
            classification: None,
            created_at: "created_at".to_string(),
            processed: "processed".to_string(),
        }
    }
}

/// Where a channel's intake rows live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub source_id: String,
    pub table: String,
    #[serde(default)]
    pub columns: SourceColumns,
}

impl SourceSpec {
    pub fn new(source_id: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            table: table.into(),
            columns: SourceColumns::default(),
        }
    }

    /// Table and column names are spliced into SQL, so only plain identifiers pass.
    pub fn validate(&self) -> Result<(), StoreError> {
        let c = &self.columns;
        let mut idents = vec![
            ("table", self.table.as_str()),
            ("id", c.id.as_str()),
            ("name", c.name.as_str()),
            ("phone", c.phone.as_str()),
            ("consultant", c.consultant.as_str()),
            ("created_at", c.created_at.as_str()),
            ("processed", c.processed.as_str()),
        ];
        if let Some(col) = c.vehicle_interest.as_deref() {
            idents.push(("vehicle_interest", col));
        }
        if let Some(col) = c.classification.as_deref() {
            idents.push(("classification", col));
        }
        for (role, ident) in idents {
            if !is_plain_identifier(ident) {
                return Err(StoreError::InvalidMapping(format!(
                    "source {}: {role} `{ident}` is not a plain SQL identifier",
                    self.source_id
                )));
            }
        }
        Ok(())
    }
}

fn is_plain_identifier(ident: &str) -> bool {
    !ident.is_empty()
        && ident.split('.').count() <= 2
        && ident.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Persistent lead and consultant records.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Rows of `source` whose processed flag is still false.
    async fn list_unprocessed(&self, source: &SourceSpec) -> Result<Vec<SourceLeadRow>, StoreError>;

    /// Active consultants in roster order (ascending id).
    async fn active_consultants(&self) -> Result<Vec<Consultant>, StoreError>;

    async fn find_lead_by_phone(&self, phone: &str) -> Result<Option<CanonicalLead>, StoreError>;

    /// Fails with `ConstraintViolation` when the phone is already present.
    async fn insert_lead(&self, lead: NewLead) -> Result<LeadId, StoreError>;

    /// Sets `processed = true`. Returns whether the flag flipped.
    async fn mark_processed(&self, source: &SourceSpec, row_id: &str) -> Result<bool, StoreError>;

    async fn update_lead_enrichment(
        &self,
        lead_id: LeadId,
        enrichment: &Enrichment,
    ) -> Result<(), StoreError>;

    async fn list_lead_phones(&self) -> Result<Vec<(String, LeadId)>, StoreError>;

    async fn list_unclassified_leads(&self, limit: usize) -> Result<Vec<CanonicalLead>, StoreError>;
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Runs `call` until it succeeds, fails permanently, or retries run out.
pub async fn with_retry<T, F, Fut>(
    policy: &BackoffPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0usize;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err)
                if err.disposition() == RetryDisposition::Retryable
                    && attempt < policy.max_retries =>
            {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient lead store failure; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
