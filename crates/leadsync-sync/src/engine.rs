use std::sync::Arc;

use chrono::Utc;
use leadsync_adapters::{lead_summary, Classifier};
use leadsync_core::{
    normalize_name, normalize_phone, Enrichment, LeadId, LeadStatus, NewLead, SourceLeadRow,
};
use leadsync_storage::{
    with_retry, BackoffPolicy, LeadStore, RetryDisposition, SourceSpec, StoreError,
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dedup::{open_index, DedupIndex, DedupMode};
use crate::report::{
    EnrichmentReport, FailureStage, RowOutcome, RowRecord, SourceReport, SyncReport,
};
use crate::resolver::{AmbiguityPolicy, ConsultantResolver, Resolution};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("lead store unreachable: {0}")]
    StoreUnreachable(#[source] StoreError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    pub backoff: BackoffPolicy,
    pub ambiguity: AmbiguityPolicy,
    pub dedup_mode: DedupMode,
}

/// Routes pending intake rows into the canonical lead store.
///
/// Per row: consultant label, resolution, phone normalization, dedup check,
/// insert or skip, then the processed flag. The flag is only set after the
/// lead is confirmed present, so re-running a pass is always safe.
pub struct SyncEngine {
    store: Arc<dyn LeadStore>,
    classifier: Option<Arc<dyn Classifier>>,
    options: EngineOptions,
}

fn is_cancelled(cancel: Option<&watch::Receiver<bool>>) -> bool {
    cancel.map(|rx| *rx.borrow()).unwrap_or(false)
}

impl SyncEngine {
    pub fn new(store: Arc<dyn LeadStore>, options: EngineOptions) -> Self {
        Self {
            store,
            classifier: None,
            options,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub async fn run_pass(&self, sources: &[SourceSpec]) -> Result<SyncReport, SyncError> {
        self.run_pass_with_cancel(sources, None).await
    }

    /// One pass over every source. Stops at the next row boundary once `cancel` reads true.
    pub async fn run_pass_with_cancel(
        &self,
        sources: &[SourceSpec],
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<SyncReport, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_pass", %run_id);
        self.run_pass_inner(run_id, sources, cancel)
            .instrument(span)
            .await
    }

    async fn run_pass_inner(
        &self,
        run_id: Uuid,
        sources: &[SourceSpec],
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<SyncReport, SyncError> {
        let started_at = Utc::now();
        let backoff = self.options.backoff;

        let resolver = ConsultantResolver::load(self.store.as_ref(), &backoff)
            .await
            .map_err(SyncError::StoreUnreachable)?;
        if resolver.is_empty() {
            warn!("active consultant roster is empty; no row can be routed");
        }
        let mut index = open_index(self.options.dedup_mode, self.store.clone(), backoff)
            .await
            .map_err(SyncError::StoreUnreachable)?;

        let mut report = SyncReport {
            run_id,
            started_at,
            finished_at: started_at,
            aborted: false,
            sources: Vec::with_capacity(sources.len()),
            rows: Vec::new(),
        };
        let mut unreachable: Option<StoreError> = None;
        let mut unreachable_sources = 0usize;

        for spec in sources {
            if is_cancelled(cancel) {
                report.aborted = true;
                break;
            }
            let span = info_span!("sync_source", source_id = %spec.source_id);
            let result = self
                .sync_source(spec, &resolver, index.as_mut(), cancel, &mut report)
                .instrument(span)
                .await;
            if let Err(err) = result {
                if err.disposition() == RetryDisposition::Retryable {
                    unreachable_sources += 1;
                    unreachable = Some(err);
                }
            }
            if report.aborted {
                break;
            }
        }

        if !report.aborted && !sources.is_empty() && unreachable_sources == sources.len() {
            if let Some(err) = unreachable {
                return Err(SyncError::StoreUnreachable(err));
            }
        }

        report.finished_at = Utc::now();
        let totals = report.totals();
        info!(
            inserted = totals.inserted,
            already_present = totals.already_present,
            skipped_no_label = totals.skipped_no_label,
            unresolved = totals.unresolved,
            ambiguous = totals.ambiguous,
            malformed = totals.malformed,
            failed = totals.failed,
            failed_sources = report.failed_sources(),
            aborted = report.aborted,
            "sync pass finished"
        );
        Ok(report)
    }

    /// Listing failures are recorded on the source report and returned so the
    /// caller can tell an unreachable store from a bad mapping.
    async fn sync_source(
        &self,
        spec: &SourceSpec,
        resolver: &ConsultantResolver,
        index: &mut dyn DedupIndex,
        cancel: Option<&watch::Receiver<bool>>,
        report: &mut SyncReport,
    ) -> Result<(), StoreError> {
        let mut source_report = SourceReport {
            source_id: spec.source_id.clone(),
            ..Default::default()
        };

        let store = self.store.as_ref();
        let listed = match spec.validate() {
            Ok(()) => {
                with_retry(&self.options.backoff, "list_unprocessed", || {
                    store.list_unprocessed(spec)
                })
                .await
            }
            Err(err) => Err(err),
        };
        let rows = match listed {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "could not list pending rows; source skipped this pass");
                source_report.listing_error = Some(err.to_string());
                report.sources.push(source_report);
                return Err(err);
            }
        };
        source_report.listed = rows.len();

        for row in rows {
            if is_cancelled(cancel) {
                report.aborted = true;
                break;
            }
            let outcome = self.process_row(spec, &row, resolver, index).await;
            match &outcome {
                RowOutcome::Inserted { .. }
                | RowOutcome::AlreadyPresent { .. }
                | RowOutcome::SkippedNoLabel => {
                    debug!(row_id = %row.id, outcome = outcome.kind(), "row routed");
                }
                other => {
                    warn!(
                        row_id = %row.id,
                        outcome = other.kind(),
                        detail = %other.detail().unwrap_or_default(),
                        "row left pending"
                    );
                }
            }
            source_report.counts.record(&outcome);
            report.rows.push(RowRecord {
                source_id: spec.source_id.clone(),
                row_id: row.id.clone(),
                outcome,
            });
        }

        info!(
            listed = source_report.listed,
            processed = source_report.counts.processed(),
            pending = source_report.counts.pending(),
            "source synced"
        );
        report.sources.push(source_report);
        Ok(())
    }

    /// Routes one row. Never fails: every problem becomes an outcome and the
    /// row stays pending unless the outcome says otherwise.
    pub async fn process_row(
        &self,
        spec: &SourceSpec,
        row: &SourceLeadRow,
        resolver: &ConsultantResolver,
        index: &mut dyn DedupIndex,
    ) -> RowOutcome {
        if let Some(error) = &row.decode_error {
            return RowOutcome::Malformed {
                reason: format!("row could not be decoded: {error}"),
            };
        }
        let Some(label) = row.consultant_label() else {
            return RowOutcome::SkippedNoLabel;
        };

        let consultant = match resolver.resolve_with_policy(label, self.options.ambiguity) {
            Resolution::Matched(consultant) => consultant,
            Resolution::Ambiguous(candidates) => {
                return RowOutcome::Ambiguous {
                    label: label.to_string(),
                    candidates: candidates.into_iter().map(|c| c.name).collect(),
                }
            }
            Resolution::NotFound { suggestion } => {
                return RowOutcome::Unresolved {
                    label: label.to_string(),
                    suggestion,
                }
            }
        };

        let phone = normalize_phone(row.phone_raw.as_deref().unwrap_or_default());
        if phone.is_empty() {
            return RowOutcome::Malformed {
                reason: "phone has no digits".to_string(),
            };
        }
        let name = match row.name.as_deref() {
            Some(raw) if !normalize_name(raw).is_empty() => raw.to_string(),
            _ => {
                return RowOutcome::Malformed {
                    reason: "name is missing".to_string(),
                }
            }
        };
        let Some(created_at) = row.created_at else {
            return RowOutcome::Malformed {
                reason: "capture timestamp is missing".to_string(),
            };
        };

        match index.lookup(&phone).await {
            Ok(Some(existing)) => return self.settle_existing(spec, row, Some(existing)).await,
            Ok(None) => {}
            Err(err) => {
                return RowOutcome::Failed {
                    stage: FailureStage::DedupLookup,
                    error: err.to_string(),
                }
            }
        }

        let lead = NewLead {
            name,
            phone: phone.clone(),
            vehicle_interest: row.vehicle_interest.clone(),
            assigned_consultant_id: consultant.id,
            status: LeadStatus::New,
            ai_classification: row.prior_classification.unwrap_or_default(),
            source: spec.source_id.clone(),
            created_at,
        };

        let store = self.store.as_ref();
        let inserted = with_retry(&self.options.backoff, "insert_lead", || {
            store.insert_lead(lead.clone())
        })
        .await;

        match inserted {
            Ok(lead_id) => {
                index.record(&phone, lead_id);
                if let Err(err) = self.mark_processed(spec, &row.id).await {
                    return RowOutcome::Failed {
                        stage: FailureStage::MarkProcessed,
                        error: err.to_string(),
                    };
                }
                if row.prior_classification.is_none() {
                    self.enrich(lead_id, &lead).await;
                }
                RowOutcome::Inserted {
                    lead_id,
                    consultant_id: consultant.id,
                }
            }
            Err(StoreError::ConstraintViolation { .. }) => {
                debug!(row_id = %row.id, "phone claimed concurrently; treating as existing lead");
                let existing = with_retry(&self.options.backoff, "find_lead_by_phone", || {
                    store.find_lead_by_phone(&phone)
                })
                .await
                .ok()
                .flatten()
                .map(|lead| lead.id);
                if let Some(lead_id) = existing {
                    index.record(&phone, lead_id);
                }
                self.settle_existing(spec, row, existing).await
            }
            Err(err) => RowOutcome::Failed {
                stage: FailureStage::Insert,
                error: err.to_string(),
            },
        }
    }

    async fn settle_existing(
        &self,
        spec: &SourceSpec,
        row: &SourceLeadRow,
        lead_id: Option<LeadId>,
    ) -> RowOutcome {
        match self.mark_processed(spec, &row.id).await {
            Ok(()) => RowOutcome::AlreadyPresent { lead_id },
            Err(err) => RowOutcome::Failed {
                stage: FailureStage::MarkProcessed,
                error: err.to_string(),
            },
        }
    }

    async fn mark_processed(&self, spec: &SourceSpec, row_id: &str) -> Result<(), StoreError> {
        let store = self.store.as_ref();
        let flipped = with_retry(&self.options.backoff, "mark_processed", || {
            store.mark_processed(spec, row_id)
        })
        .await?;
        if !flipped {
            debug!(row_id, "row was already marked processed");
        }
        Ok(())
    }

    /// Best effort: a classifier or store failure leaves the neutral label in place.
    async fn enrich(&self, lead_id: LeadId, lead: &NewLead) {
        let Some(classifier) = &self.classifier else {
            return;
        };
        let summary = lead_summary(&lead.name, lead.vehicle_interest.as_deref(), &lead.source);
        let verdict = match classifier.classify(&summary).await {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(%lead_id, classifier = classifier.name(), error = %err, "classification failed; lead keeps neutral label");
                return;
            }
        };
        let enrichment = Enrichment {
            classification: verdict.label,
            reasoning: verdict.reasoning,
        };
        let store = self.store.as_ref();
        if let Err(err) = with_retry(&self.options.backoff, "update_lead_enrichment", || {
            store.update_lead_enrichment(lead_id, &enrichment)
        })
        .await
        {
            warn!(%lead_id, error = %err, "could not store classification");
        }
    }

    /// Re-classifies stored leads still carrying the neutral label.
    pub async fn enrich_unclassified(&self, limit: usize) -> Result<EnrichmentReport, SyncError> {
        let mut report = EnrichmentReport::default();
        let Some(classifier) = &self.classifier else {
            warn!("no classifier configured; nothing to enrich");
            return Ok(report);
        };
        let store = self.store.as_ref();
        let leads = with_retry(&self.options.backoff, "list_unclassified_leads", || {
            store.list_unclassified_leads(limit)
        })
        .await
        .map_err(SyncError::StoreUnreachable)?;
        report.candidates = leads.len();

        for lead in leads {
            let summary = lead_summary(&lead.name, lead.vehicle_interest.as_deref(), &lead.source);
            let verdict = match classifier.classify(&summary).await {
                Ok(verdict) => verdict,
                Err(err) => {
                    warn!(lead_id = %lead.id, error = %err, "classification failed");
                    report.failed += 1;
                    continue;
                }
            };
            let enrichment = Enrichment {
                classification: verdict.label,
                reasoning: verdict.reasoning,
            };
            match with_retry(&self.options.backoff, "update_lead_enrichment", || {
                store.update_lead_enrichment(lead.id, &enrichment)
            })
            .await
            {
                Ok(()) => report.classified += 1,
                Err(err) => {
                    warn!(lead_id = %lead.id, error = %err, "could not store classification");
                    report.failed += 1;
                }
            }
        }

        info!(
            candidates = report.candidates,
            classified = report.classified,
            failed = report.failed,
            "enrichment pass finished"
        );
        Ok(report)
    }
}
