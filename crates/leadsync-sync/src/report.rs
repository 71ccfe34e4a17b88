use chrono::{DateTime, Utc};
use leadsync_core::{ConsultantId, LeadId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    DedupLookup,
    Insert,
    MarkProcessed,
}

/// Result of routing one intake row. Only `Inserted` and `AlreadyPresent`
/// leave the row marked processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RowOutcome {
    Inserted {
        lead_id: LeadId,
        consultant_id: ConsultantId,
    },
    AlreadyPresent {
        lead_id: Option<LeadId>,
    },
    SkippedNoLabel,
    Unresolved {
        label: String,
        suggestion: Option<String>,
    },
    Ambiguous {
        label: String,
        candidates: Vec<String>,
    },
    Malformed {
        reason: String,
    },
    Failed {
        stage: FailureStage,
        error: String,
    },
}

impl RowOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Inserted { .. } => "inserted",
            Self::AlreadyPresent { .. } => "already_present",
            Self::SkippedNoLabel => "skipped_no_label",
            Self::Unresolved { .. } => "unresolved",
            Self::Ambiguous { .. } => "ambiguous",
            Self::Malformed { .. } => "malformed",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn marks_processed(&self) -> bool {
        matches!(self, Self::Inserted { .. } | Self::AlreadyPresent { .. })
    }

    pub fn lead_id(&self) -> Option<LeadId> {
        match self {
            Self::Inserted { lead_id, .. } => Some(*lead_id),
            Self::AlreadyPresent { lead_id } => *lead_id,
            _ => None,
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Unresolved {
                label,
                suggestion: Some(s),
            } => Some(format!("no active consultant matches `{label}` (closest: {s})")),
            Self::Unresolved { label, .. } => Some(format!("no active consultant matches `{label}`")),
            Self::Ambiguous { label, candidates } => Some(format!(
                "`{label}` matches {}",
                candidates.join(", ")
            )),
            Self::Malformed { reason } => Some(reason.clone()),
            Self::Failed { stage, error } => Some(format!("{stage:?}: {error}")),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub inserted: usize,
    pub already_present: usize,
    pub skipped_no_label: usize,
    pub unresolved: usize,
    pub ambiguous: usize,
    pub malformed: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, outcome: &RowOutcome) {
        match outcome {
            RowOutcome::Inserted { .. } => self.inserted += 1,
            RowOutcome::AlreadyPresent { .. } => self.already_present += 1,
            RowOutcome::SkippedNoLabel => self.skipped_no_label += 1,
            RowOutcome::Unresolved { .. } => self.unresolved += 1,
            RowOutcome::Ambiguous { .. } => self.ambiguous += 1,
            RowOutcome::Malformed { .. } => self.malformed += 1,
            RowOutcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.inserted + self.already_present
    }

    /// Rows left unprocessed for a later pass.
    pub fn pending(&self) -> usize {
        self.skipped_no_label + self.unresolved + self.ambiguous + self.malformed + self.failed
    }

    pub fn merge(&mut self, other: &OutcomeCounts) {
        self.inserted += other.inserted;
        self.already_present += other.already_present;
        self.skipped_no_label += other.skipped_no_label;
        self.unresolved += other.unresolved;
        self.ambiguous += other.ambiguous;
        self.malformed += other.malformed;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowRecord {
    pub source_id: String,
    pub row_id: String,
    #[serde(flatten)]
    pub outcome: RowOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source_id: String,
    pub listed: usize,
    pub counts: OutcomeCounts,
    pub listing_error: Option<String>,
}

/// Everything one sync pass did. Built fresh per pass and returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub aborted: bool,
    pub sources: Vec<SourceReport>,
    pub rows: Vec<RowRecord>,
}

impl SyncReport {
    pub fn totals(&self) -> OutcomeCounts {
        let mut totals = OutcomeCounts::default();
        for source in &self.sources {
            totals.merge(&source.counts);
        }
        totals
    }

    pub fn failed_sources(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| s.listing_error.is_some())
            .count()
    }

    /// Rows an operator should look at: everything left pending except missing labels.
    pub fn diagnostics(&self) -> impl Iterator<Item = &RowRecord> {
        self.rows.iter().filter(|r| {
            !r.outcome.marks_processed() && !matches!(r.outcome, RowOutcome::SkippedNoLabel)
        })
    }

    pub fn source(&self, source_id: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentReport {
    pub candidates: usize,
    pub classified: usize,
    pub failed: usize,
}
