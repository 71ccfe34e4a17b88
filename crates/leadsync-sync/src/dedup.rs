use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use leadsync_core::LeadId;
use leadsync_storage::{with_retry, BackoffPolicy, LeadStore, StoreError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    /// One store lookup per row.
    #[default]
    PointQuery,
    /// Phone map loaded once per pass and kept current with this pass's inserts.
    Preloaded,
}

/// Existence check on normalized phones. The storage uniqueness constraint
/// remains the final arbiter for inserts.
#[async_trait]
pub trait DedupIndex: Send {
    async fn lookup(&mut self, phone: &str) -> Result<Option<LeadId>, StoreError>;

    fn record(&mut self, phone: &str, lead_id: LeadId);

    async fn exists(&mut self, phone: &str) -> Result<bool, StoreError> {
        Ok(self.lookup(phone).await?.is_some())
    }
}

pub struct PointQueryIndex {
    store: Arc<dyn LeadStore>,
    backoff: BackoffPolicy,
}

impl PointQueryIndex {
    pub fn new(store: Arc<dyn LeadStore>, backoff: BackoffPolicy) -> Self {
        Self { store, backoff }
    }
}

#[async_trait]
impl DedupIndex for PointQueryIndex {
    async fn lookup(&mut self, phone: &str) -> Result<Option<LeadId>, StoreError> {
        let store = self.store.as_ref();
        let lead = with_retry(&self.backoff, "find_lead_by_phone", || {
            store.find_lead_by_phone(phone)
        })
        .await?;
        Ok(lead.map(|l| l.id))
    }

    fn record(&mut self, _phone: &str, _lead_id: LeadId) {}
}

#[derive(Debug, Default)]
pub struct PreloadedIndex {
    phones: HashMap<String, LeadId>,
}

impl PreloadedIndex {
    pub async fn load(store: &dyn LeadStore, backoff: &BackoffPolicy) -> Result<Self, StoreError> {
        let pairs = with_retry(backoff, "list_lead_phones", || store.list_lead_phones()).await?;
        Ok(Self::from_pairs(pairs))
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, LeadId)>) -> Self {
        Self {
            phones: pairs.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.phones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phones.is_empty()
    }
}

#[async_trait]
impl DedupIndex for PreloadedIndex {
    async fn lookup(&mut self, phone: &str) -> Result<Option<LeadId>, StoreError> {
        Ok(self.phones.get(phone).copied())
    }

    fn record(&mut self, phone: &str, lead_id: LeadId) {
        self.phones.insert(phone.to_string(), lead_id);
    }
}

pub async fn open_index(
    mode: DedupMode,
    store: Arc<dyn LeadStore>,
    backoff: BackoffPolicy,
) -> Result<Box<dyn DedupIndex>, StoreError> {
    Ok(match mode {
        DedupMode::PointQuery => Box::new(PointQueryIndex::new(store, backoff)),
        DedupMode::Preloaded => Box::new(PreloadedIndex::load(store.as_ref(), &backoff).await?),
    })
}
