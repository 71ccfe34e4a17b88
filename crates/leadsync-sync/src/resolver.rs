use leadsync_core::{fold_for_match, Consultant};
use leadsync_storage::{with_retry, BackoffPolicy, LeadStore, StoreError};
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use tracing::warn;

const SUGGESTION_THRESHOLD: f64 = 0.80;

/// What to do when a label partially matches several roster names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Leave the row unprocessed until the label or roster disambiguates it.
    #[default]
    Reject,
    /// Legacy behavior: take the first candidate in roster order.
    FirstMatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Matched(Consultant),
    Ambiguous(Vec<Consultant>),
    /// `suggestion` is the closest roster name, for operators only.
    NotFound { suggestion: Option<String> },
}

/// Maps free-text consultant labels onto the active roster.
#[derive(Debug, Clone, Default)]
pub struct ConsultantResolver {
    roster: Vec<(String, Consultant)>,
}

impl ConsultantResolver {
    /// Inactive consultants are dropped; order is kept as the tie-break order.
    pub fn new(consultants: impl IntoIterator<Item = Consultant>) -> Self {
        let roster = consultants
            .into_iter()
            .filter(|c| c.is_active)
            .map(|c| (fold_for_match(&c.name), c))
            .filter(|(folded, _)| !folded.is_empty())
            .collect();
        Self { roster }
    }

    pub async fn load(store: &dyn LeadStore, backoff: &BackoffPolicy) -> Result<Self, StoreError> {
        let consultants = with_retry(backoff, "active_consultants", || store.active_consultants()).await?;
        Ok(Self::new(consultants))
    }

    pub fn len(&self) -> usize {
        self.roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    /// Exact (case and accent insensitive) match first. Then the label may be part of a
    /// roster name, or a roster name may appear as whole words inside the label.
    pub fn resolve(&self, label: &str) -> Resolution {
        let needle = fold_for_match(label);
        if needle.is_empty() {
            return Resolution::NotFound { suggestion: None };
        }

        let mut exact = self
            .roster
            .iter()
            .filter(|(name, _)| *name == needle)
            .map(|(_, c)| c.clone())
            .collect::<Vec<_>>();
        match exact.len() {
            0 => {}
            1 => return Resolution::Matched(exact.remove(0)),
            _ => return Resolution::Ambiguous(exact),
        }

        let mut partial = self
            .roster
            .iter()
            .filter(|(name, _)| name.contains(&needle) || contains_words(&needle, name))
            .map(|(_, c)| c.clone())
            .collect::<Vec<_>>();
        match partial.len() {
            0 => Resolution::NotFound {
                suggestion: self.closest_name(&needle),
            },
            1 => Resolution::Matched(partial.remove(0)),
            _ => Resolution::Ambiguous(partial),
        }
    }

    pub fn resolve_with_policy(&self, label: &str, policy: AmbiguityPolicy) -> Resolution {
        match (self.resolve(label), policy) {
            (Resolution::Ambiguous(mut candidates), AmbiguityPolicy::FirstMatch) => {
                let names = candidates.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
                warn!(
                    label,
                    candidates = ?names,
                    chosen = names[0],
                    "ambiguous consultant label; taking first roster match"
                );
                Resolution::Matched(candidates.swap_remove(0))
            }
            (resolution, _) => resolution,
        }
    }

    fn closest_name(&self, needle: &str) -> Option<String> {
        self.roster
            .iter()
            .map(|(name, c)| (jaro_winkler(name, needle), c))
            .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, c)| c.name.clone())
    }
}

fn words(folded: &str) -> Vec<&str> {
    folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

/// True when the words of `name` appear contiguously in `label`.
fn contains_words(label: &str, name: &str) -> bool {
    let name = words(name);
    if name.is_empty() {
        return false;
    }
    words(label).windows(name.len()).any(|w| w == name.as_slice())
}
