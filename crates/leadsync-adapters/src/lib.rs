//! Intake fixture contracts and external enrichment collaborators.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use leadsync_core::{Classification, Consultant, SourceLeadRow};
use leadsync_storage::InMemoryLeadStore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

mod classifier;

pub use classifier::{
    lead_summary, Classifier, ClassifierError, ClassifierVerdict, HttpClassifier,
    HttpClassifierConfig, KeywordClassifier,
};

pub const CRATE_NAME: &str = "leadsync-adapters";

/// Kind of lead-capture pipeline behind a source table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    MessagingBot,
    WebForm,
    LegacyIntake,
    Manual,
}

/// Captured intake rows of one channel, as stored under `fixtures/<source_id>/rows.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeBundle {
    pub source_id: String,
    pub kind: ChannelKind,
    pub captured_at: DateTime<Utc>,
    pub rows: Vec<IntakeFixtureRow>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntakeFixtureRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub vehicle_interest: Option<String>,
    #[serde(default)]
    pub consultant: Option<String>,
    #[serde(default)]
    pub classification: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterFixture {
    pub consultants: Vec<Consultant>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub consultants: usize,
    pub sources: usize,
    pub rows: usize,
}

pub fn intake_bundle_path(fixtures_root: &Path, source_id: &str) -> PathBuf {
    fixtures_root.join(source_id).join("rows.json")
}

pub fn roster_path(fixtures_root: &Path) -> PathBuf {
    fixtures_root.join("roster.json")
}

pub fn load_intake_bundle(path: impl AsRef<Path>) -> Result<IntakeBundle> {
    read_json_file(path)
}

pub fn load_roster(path: impl AsRef<Path>) -> Result<Vec<Consultant>> {
    let roster: RosterFixture = read_json_file(path)?;
    Ok(roster.consultants)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Stable id for fixture rows that do not carry one.
pub fn deterministic_row_id(bundle: &IntakeBundle, index: usize) -> String {
    let seed = format!("{}:{}:{}", bundle.source_id, bundle.captured_at.to_rfc3339(), index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).to_string()
}

/// Unknown classification labels are logged and dropped; the row itself is kept.
pub fn bundle_to_rows(bundle: &IntakeBundle) -> Vec<SourceLeadRow> {
    bundle
        .rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let parsed = row.classification.as_deref().map(str::parse::<Classification>);
            let prior_classification = match parsed {
                Some(Ok(Classification::Unclassified)) | None => None,
                Some(Ok(parsed)) => Some(parsed),
                Some(Err(err)) => {
                    warn!(
                        source_id = %bundle.source_id,
                        row = index,
                        error = %err,
                        "ignoring unknown fixture classification"
                    );
                    None
                }
            };
            SourceLeadRow {
                source_id: bundle.source_id.clone(),
                id: row
                    .id
                    .clone()
                    .unwrap_or_else(|| deterministic_row_id(bundle, index)),
                name: row.name.clone(),
                phone_raw: row.phone.clone(),
                vehicle_interest: row.vehicle_interest.clone(),
                consultant_label: row.consultant.clone(),
                prior_classification,
                created_at: row.created_at,
                processed: row.processed,
                decode_error: None,
            }
        })
        .collect()
}

/// Loads the roster and each listed channel's intake fixture into `store`.
/// Channels without a fixture file are skipped.
pub async fn seed_memory_store(
    store: &InMemoryLeadStore,
    fixtures_root: &Path,
    source_ids: &[String],
) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    let roster_file = roster_path(fixtures_root);
    if roster_file.exists() {
        for consultant in load_roster(&roster_file)? {
            store.add_consultant(consultant).await;
            summary.consultants += 1;
        }
    } else {
        warn!(path = %roster_file.display(), "no roster fixture; every row will stay unresolved");
    }

    for source_id in source_ids {
        let path = intake_bundle_path(fixtures_root, source_id);
        if !path.exists() {
            warn!(source_id = %source_id, path = %path.display(), "no intake fixture for source");
            continue;
        }
        let bundle = load_intake_bundle(&path)?;
        if &bundle.source_id != source_id {
            return Err(anyhow::anyhow!(
                "fixture {} declares source_id={} but is registered as {}",
                path.display(),
                bundle.source_id,
                source_id
            ));
        }
        let rows = bundle_to_rows(&bundle);
        summary.rows += rows.len();
        summary.sources += 1;
        store.push_source_rows(source_id, rows).await;
    }

    info!(
        consultants = summary.consultants,
        sources = summary.sources,
        rows = summary.rows,
        "seeded in-memory lead store from fixtures"
    );
    Ok(summary)
}
