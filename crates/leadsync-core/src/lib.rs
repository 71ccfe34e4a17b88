//! Core domain model and normalization helpers for lead reconciliation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

pub const CRATE_NAME: &str = "leadsync-core";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsultantId(pub i64);

impl fmt::Display for ConsultantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeadId(pub Uuid);

impl LeadId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Intent label attached to a canonical lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Hot,
    Warm,
    Cold,
    /// Neutral label stored until a classifier produces one of the others.
    #[default]
    Unclassified,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLabel(pub String);

impl fmt::Display for UnknownLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown label `{}`", self.0)
    }
}

impl std::error::Error for UnknownLabel {}

impl FromStr for Classification {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(Self::Hot),
            "warm" => Ok(Self::Warm),
            "cold" => Ok(Self::Cold),
            "unclassified" | "" => Ok(Self::Unclassified),
            _ => Err(UnknownLabel(s.to_string())),
        }
    }
}

/// Lifecycle state of a canonical lead. The sync engine only ever produces `New`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    Negotiating,
    Won,
    Lost,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Negotiating => "negotiating",
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }
}

impl FromStr for LeadStatus {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(Self::New),
            "contacted" => Ok(Self::Contacted),
            "negotiating" => Ok(Self::Negotiating),
            "won" => Ok(Self::Won),
            "lost" => Ok(Self::Lost),
            _ => Err(UnknownLabel(s.to_string())),
        }
    }
}

/// One intake row as read from a channel's source table.
///
/// Only `processed` is ever written back by the sync engine, and only from
/// `false` to `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLeadRow {
    pub source_id: String,
    pub id: String,
    pub name: Option<String>,
    pub phone_raw: Option<String>,
    pub vehicle_interest: Option<String>,
    pub consultant_label: Option<String>,
    pub prior_classification: Option<Classification>,
    pub created_at: Option<DateTime<Utc>>,
    pub processed: bool,
    /// Set when the backend could not decode the row; such a row is never synced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
}

impl SourceLeadRow {
    /// The consultant label, if present and not blank.
    pub fn consultant_label(&self) -> Option<&str> {
        self.consultant_label
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consultant {
    pub id: ConsultantId,
    pub name: String,
    pub is_active: bool,
}

/// Insert payload for a canonical lead; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLead {
    pub name: String,
    pub phone: String,
    pub vehicle_interest: Option<String>,
    pub assigned_consultant_id: ConsultantId,
    pub status: LeadStatus,
    pub ai_classification: Classification,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Deduplicated, consultant-assigned lead. At most one exists per normalized phone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalLead {
    pub id: LeadId,
    pub name: String,
    pub phone: String,
    pub vehicle_interest: Option<String>,
    pub assigned_consultant_id: ConsultantId,
    pub status: LeadStatus,
    pub ai_classification: Classification,
    pub ai_reasoning: Option<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl CanonicalLead {
    pub fn from_new(id: LeadId, lead: NewLead) -> Self {
        Self {
            id,
            name: lead.name,
            phone: lead.phone,
            vehicle_interest: lead.vehicle_interest,
            assigned_consultant_id: lead.assigned_consultant_id,
            status: lead.status,
            ai_classification: lead.ai_classification,
            ai_reasoning: None,
            source: lead.source,
            created_at: lead.created_at,
        }
    }
}

/// Classification outcome written through `update_lead_enrichment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    pub classification: Classification,
    pub reasoning: Option<String>,
}

/// Digits-only dedup key. An empty result is possible and is handled by the caller.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Trimmed name with inner whitespace runs collapsed.
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Comparison form for roster matching: normalized, lowercased, accents stripped.
/// Never stored.
pub fn fold_for_match(raw: &str) -> String {
    normalize_name(raw)
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}
