use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use leadsync_core::{
    CanonicalLead, Classification, Consultant, Enrichment, LeadId, NewLead, SourceLeadRow,
};
use tokio::sync::Mutex;

use crate::{LeadStore, SourceSpec, StoreError};

/// Operations of the in-memory store that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ListUnprocessed,
    ActiveConsultants,
    FindLeadByPhone,
    InsertLead,
    MarkProcessed,
    UpdateEnrichment,
    ListLeadPhones,
    ListUnclassified,
}

#[derive(Debug, Default)]
struct MemoryState {
    sources: BTreeMap<String, Vec<SourceLeadRow>>,
    consultants: Vec<Consultant>,
    leads: Vec<CanonicalLead>,
    by_phone: HashMap<String, usize>,
    faults: HashMap<StoreOp, usize>,
    processed_flips: usize,
}

impl MemoryState {
    fn trip(&mut self, op: StoreOp) -> Result<(), StoreError> {
        match self.faults.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Unavailable(format!("injected failure for {op:?}")))
            }
            _ => Ok(()),
        }
    }
}

/// Process-local lead store with the same contract as the Postgres one,
/// including phone uniqueness. Backs fixture dry runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryLeadStore {
    state: Mutex<MemoryState>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_consultant(&self, consultant: Consultant) {
        let mut state = self.state.lock().await;
        state.consultants.push(consultant);
        state.consultants.sort_by_key(|c| c.id);
    }

    pub async fn set_consultant_active(&self, name: &str, is_active: bool) {
        let mut state = self.state.lock().await;
        for consultant in state.consultants.iter_mut().filter(|c| c.name == name) {
            consultant.is_active = is_active;
        }
    }

    pub async fn push_source_rows(&self, source_id: &str, rows: Vec<SourceLeadRow>) {
        let mut state = self.state.lock().await;
        state
            .sources
            .entry(source_id.to_string())
            .or_default()
            .extend(rows);
    }

    /// Simulates an upstream edit of a row's consultant label.
    pub async fn set_consultant_label(&self, source_id: &str, row_id: &str, label: Option<&str>) {
        let mut state = self.state.lock().await;
        if let Some(row) = state
            .sources
            .get_mut(source_id)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == row_id))
        {
            row.consultant_label = label.map(ToString::to_string);
        }
    }

    /// The next `count` calls of `op` fail with `StoreError::Unavailable`.
    pub async fn inject_failures(&self, op: StoreOp, count: usize) {
        self.state.lock().await.faults.insert(op, count);
    }

    pub async fn leads(&self) -> Vec<CanonicalLead> {
        self.state.lock().await.leads.clone()
    }

    pub async fn source_rows(&self, source_id: &str) -> Vec<SourceLeadRow> {
        self.state
            .lock()
            .await
            .sources
            .get(source_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of false-to-true processed transitions performed so far.
    pub async fn processed_flips(&self) -> usize {
        self.state.lock().await.processed_flips
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn list_unprocessed(&self, source: &SourceSpec) -> Result<Vec<SourceLeadRow>, StoreError> {
        let mut state = self.state.lock().await;
        state.trip(StoreOp::ListUnprocessed)?;
        Ok(state
            .sources
            .get(&source.source_id)
            .map(|rows| rows.iter().filter(|r| !r.processed).cloned().collect())
            .unwrap_or_default())
    }

    async fn active_consultants(&self) -> Result<Vec<Consultant>, StoreError> {
        let mut state = self.state.lock().await;
        state.trip(StoreOp::ActiveConsultants)?;
        Ok(state
            .consultants
            .iter()
            .filter(|c| c.is_active)
            .cloned()
            .collect())
    }

    async fn find_lead_by_phone(&self, phone: &str) -> Result<Option<CanonicalLead>, StoreError> {
        let mut state = self.state.lock().await;
        state.trip(StoreOp::FindLeadByPhone)?;
        Ok(state.by_phone.get(phone).map(|&idx| state.leads[idx].clone()))
    }

    async fn insert_lead(&self, lead: NewLead) -> Result<LeadId, StoreError> {
        let mut state = self.state.lock().await;
        state.trip(StoreOp::InsertLead)?;
        if state.by_phone.contains_key(&lead.phone) {
            return Err(StoreError::ConstraintViolation { phone: lead.phone });
        }
        let id = LeadId::new_v4();
        let idx = state.leads.len();
        state.by_phone.insert(lead.phone.clone(), idx);
        state.leads.push(CanonicalLead::from_new(id, lead));
        Ok(id)
    }

    async fn mark_processed(&self, source: &SourceSpec, row_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        state.trip(StoreOp::MarkProcessed)?;
        let row = state
            .sources
            .get_mut(&source.source_id)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == row_id))
            .ok_or_else(|| {
                StoreError::NotFound(format!("row {row_id} in source {}", source.source_id))
            })?;
        if row.processed {
            return Ok(false);
        }
        row.processed = true;
        state.processed_flips += 1;
        Ok(true)
    }

    async fn update_lead_enrichment(
        &self,
        lead_id: LeadId,
        enrichment: &Enrichment,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.trip(StoreOp::UpdateEnrichment)?;
        let lead = state
            .leads
            .iter_mut()
            .find(|l| l.id == lead_id)
            .ok_or_else(|| StoreError::NotFound(format!("lead {lead_id}")))?;
        lead.ai_classification = enrichment.classification;
        lead.ai_reasoning = enrichment.reasoning.clone();
        Ok(())
    }

    async fn list_lead_phones(&self) -> Result<Vec<(String, LeadId)>, StoreError> {
        let mut state = self.state.lock().await;
        state.trip(StoreOp::ListLeadPhones)?;
        Ok(state
            .leads
            .iter()
            .map(|l| (l.phone.clone(), l.id))
            .collect())
    }

    async fn list_unclassified_leads(&self, limit: usize) -> Result<Vec<CanonicalLead>, StoreError> {
        let mut state = self.state.lock().await;
        state.trip(StoreOp::ListUnclassified)?;
        let mut out = state
            .leads
            .iter()
            .filter(|l| l.ai_classification == Classification::Unclassified)
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by_key(|l| l.created_at);
        out.truncate(limit);
        Ok(out)
    }
}
