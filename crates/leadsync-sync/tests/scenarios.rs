use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use leadsync_adapters::{Classifier, ClassifierError, ClassifierVerdict, KeywordClassifier};
use leadsync_core::{
    normalize_phone, CanonicalLead, Classification, Consultant, ConsultantId, Enrichment, LeadId,
    NewLead, SourceLeadRow,
};
use leadsync_storage::{BackoffPolicy, InMemoryLeadStore, LeadStore, SourceSpec, StoreError, StoreOp};
use leadsync_sync::{
    AmbiguityPolicy, DedupMode, EngineOptions, FailureStage, RowOutcome, SyncEngine, SyncError,
};
use tokio::sync::watch;

fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    }
}

fn options(dedup_mode: DedupMode) -> EngineOptions {
    EngineOptions {
        backoff: fast_backoff(),
        ambiguity: AmbiguityPolicy::Reject,
        dedup_mode,
    }
}

fn consultant(id: i64, name: &str) -> Consultant {
    Consultant {
        id: ConsultantId(id),
        name: name.to_string(),
        is_active: true,
    }
}

fn row(source_id: &str, id: &str, name: &str, phone: &str, label: Option<&str>) -> SourceLeadRow {
    SourceLeadRow {
        source_id: source_id.to_string(),
        id: id.to_string(),
        name: Some(name.to_string()),
        phone_raw: Some(phone.to_string()),
        vehicle_interest: Some("Jeep Compass".to_string()),
        consultant_label: label.map(ToString::to_string),
        prior_classification: None,
        created_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
        processed: false,
        decode_error: None,
    }
}

fn bot() -> SourceSpec {
    SourceSpec::new("bot", "bot_leads")
}

fn legacy() -> SourceSpec {
    SourceSpec::new("legacy", "legacy_leads")
}

async fn store_with_roster() -> Arc<InMemoryLeadStore> {
    let store = Arc::new(InMemoryLeadStore::new());
    store.add_consultant(consultant(7, "Sergio")).await;
    store.add_consultant(consultant(3, "Ana Paula")).await;
    store.add_consultant(consultant(5, "Ana Beatriz")).await;
    store
}

#[tokio::test]
async fn new_row_becomes_assigned_lead_and_is_marked() {
    let store = store_with_roster().await;
    store
        .push_source_rows(
            "bot",
            vec![row("bot", "1", "Maria Silva", "(11) 98888-7777", Some("sergio"))],
        )
        .await;
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery));

    let report = engine.run_pass(&[bot()]).await.unwrap();

    let leads = store.leads().await;
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].phone, "11988887777");
    assert_eq!(leads[0].assigned_consultant_id, ConsultantId(7));
    assert_eq!(leads[0].name, "Maria Silva");
    assert_eq!(leads[0].source, "bot");
    assert_eq!(leads[0].ai_classification, Classification::Unclassified);
    assert!(store.source_rows("bot").await[0].processed);
    assert_eq!(report.totals().inserted, 1);
    assert!(matches!(
        report.rows[0].outcome,
        RowOutcome::Inserted { consultant_id: ConsultantId(7), .. }
    ));
}

#[tokio::test]
async fn processed_rows_are_not_pulled_again() {
    let store = store_with_roster().await;
    store
        .push_source_rows(
            "bot",
            vec![row("bot", "1", "Maria Silva", "(11) 98888-7777", Some("sergio"))],
        )
        .await;
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery));

    engine.run_pass(&[bot()]).await.unwrap();
    let second = engine.run_pass(&[bot()]).await.unwrap();

    assert_eq!(store.leads().await.len(), 1);
    assert_eq!(second.source("bot").unwrap().listed, 0);
    assert!(second.rows.is_empty());
    assert_eq!(store.processed_flips().await, 1);
}

#[tokio::test]
async fn unknown_consultant_leaves_row_pending() {
    let store = store_with_roster().await;
    store
        .push_source_rows(
            "bot",
            vec![row("bot", "1", "Carlos", "11 97777-0000", Some("Roberto"))],
        )
        .await;
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery));

    for _ in 0..3 {
        let report = engine.run_pass(&[bot()]).await.unwrap();
        assert_eq!(report.totals().unresolved, 1);
        assert_eq!(report.diagnostics().count(), 1);
    }
    assert!(store.leads().await.is_empty());
    assert!(!store.source_rows("bot").await[0].processed);

    store.add_consultant(consultant(11, "Roberto")).await;
    let report = engine.run_pass(&[bot()]).await.unwrap();
    assert_eq!(report.totals().inserted, 1);
    assert_eq!(store.leads().await[0].assigned_consultant_id, ConsultantId(11));
    assert!(store.source_rows("bot").await[0].processed);
}

#[tokio::test]
async fn corrected_label_is_picked_up_on_next_pass() {
    let store = store_with_roster().await;
    store
        .push_source_rows(
            "bot",
            vec![row("bot", "1", "Carlos", "11 97777-0000", Some("Sergyo"))],
        )
        .await;
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery));

    let report = engine.run_pass(&[bot()]).await.unwrap();
    match &report.rows[0].outcome {
        RowOutcome::Unresolved { suggestion, .. } => {
            assert_eq!(suggestion.as_deref(), Some("Sergio"))
        }
        other => panic!("unexpected {other:?}"),
    }

    store.set_consultant_label("bot", "1", Some("Sergio")).await;
    let report = engine.run_pass(&[bot()]).await.unwrap();
    assert_eq!(report.totals().inserted, 1);
}

async fn same_phone_across_channels(mode: DedupMode) {
    let store = store_with_roster().await;
    store
        .push_source_rows(
            "bot",
            vec![row("bot", "b1", "Joana", "11 99999-0000", Some("Sergio"))],
        )
        .await;
    store
        .push_source_rows(
            "legacy",
            vec![row("legacy", "l1", "Joana P.", "+55 (11) 99999-0000", Some("Ana Paula"))],
        )
        .await;
    // the legacy row carries a country code, so it normalizes differently
    store
        .push_source_rows(
            "legacy",
            vec![row("legacy", "l2", "Joana", "(11) 99999-0000", Some("Ana Paula"))],
        )
        .await;
    let engine = SyncEngine::new(store.clone(), options(mode));

    let report = engine.run_pass(&[bot(), legacy()]).await.unwrap();

    let leads = store.leads().await;
    let joana = leads
        .iter()
        .filter(|l| l.phone == "11999990000")
        .collect::<Vec<_>>();
    assert_eq!(joana.len(), 1);
    assert_eq!(joana[0].source, "bot");
    assert_eq!(joana[0].assigned_consultant_id, ConsultantId(7));

    let l2 = report.rows.iter().find(|r| r.row_id == "l2").unwrap();
    assert_eq!(
        l2.outcome,
        RowOutcome::AlreadyPresent {
            lead_id: Some(joana[0].id)
        }
    );
    assert!(store.source_rows("legacy").await.iter().all(|r| r.processed));
}

#[tokio::test]
async fn same_phone_across_channels_creates_one_lead() {
    same_phone_across_channels(DedupMode::PointQuery).await;
}

#[tokio::test]
async fn preloaded_index_sees_inserts_from_the_same_pass() {
    same_phone_across_channels(DedupMode::Preloaded).await;
}

#[tokio::test]
async fn repeated_passes_keep_one_lead_per_phone() {
    let store = store_with_roster().await;
    store
        .push_source_rows(
            "bot",
            vec![
                row("bot", "1", "A", "11 90000-0001", Some("Sergio")),
                row("bot", "2", "B", "11 90000-0002", None),
                row("bot", "3", "C", "11 90000-0001", Some("Ana Paula")),
                row("bot", "4", "D", "", Some("Sergio")),
            ],
        )
        .await;
    store
        .push_source_rows(
            "legacy",
            vec![
                row("legacy", "1", "E", "1190000-0002", Some("Ana Beatriz")),
                row("legacy", "2", "F", "11 90000-0003", Some("ana")),
            ],
        )
        .await;
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery));

    engine.run_pass(&[bot(), legacy()]).await.unwrap();
    let first = store.leads().await;
    let flips = store.processed_flips().await;
    engine.run_pass(&[bot(), legacy()]).await.unwrap();
    engine.run_pass(&[bot(), legacy()]).await.unwrap();
    let third = store.leads().await;

    assert_eq!(first, third);
    assert_eq!(flips, store.processed_flips().await);
    let phones = third.iter().map(|l| l.phone.as_str()).collect::<HashSet<_>>();
    assert_eq!(phones.len(), third.len());

    for source in ["bot", "legacy"] {
        for r in store.source_rows(source).await.iter().filter(|r| r.processed) {
            let phone = normalize_phone(r.phone_raw.as_deref().unwrap_or_default());
            assert!(phones.contains(phone.as_str()), "{source}/{} flagged without lead", r.id);
        }
    }
}

#[tokio::test]
async fn rows_without_label_or_phone_stay_pending() {
    let store = store_with_roster().await;
    let mut nameless = row("bot", "3", "", "11 95555-0000", Some("Sergio"));
    nameless.name = Some("   ".into());
    let mut undated = row("bot", "4", "Lia", "11 94444-0000", Some("Sergio"));
    undated.created_at = None;
    store
        .push_source_rows(
            "bot",
            vec![
                row("bot", "1", "Ana", "11 96666-0000", Some("  ")),
                row("bot", "2", "Bia", "sem telefone", Some("Sergio")),
                nameless,
                undated,
            ],
        )
        .await;
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery));

    let report = engine.run_pass(&[bot()]).await.unwrap();

    let counts = report.totals();
    assert_eq!(counts.skipped_no_label, 1);
    assert_eq!(counts.malformed, 3);
    assert!(store.leads().await.is_empty());
    assert!(store.source_rows("bot").await.iter().all(|r| !r.processed));
}

#[tokio::test]
async fn row_that_failed_to_decode_is_reported_and_left_pending() {
    let store = store_with_roster().await;
    let mut broken = row("bot", "9", "Lia", "11 94444-0000", Some("Sergio"));
    broken.decode_error = Some("column \"created_at\": mismatched types".into());
    store.push_source_rows("bot", vec![broken]).await;
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery));

    let report = engine.run_pass(&[bot()]).await.unwrap();

    assert_eq!(report.totals().malformed, 1);
    assert_eq!(report.diagnostics().count(), 1);
    match &report.rows[0].outcome {
        RowOutcome::Malformed { reason } => assert!(reason.contains("created_at")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(store.leads().await.is_empty());
    assert!(!store.source_rows("bot").await[0].processed);
}

#[tokio::test]
async fn names_hidden_inside_other_names_are_not_assigned() {
    let store = Arc::new(InMemoryLeadStore::new());
    store.add_consultant(consultant(3, "Ana")).await;
    store.add_consultant(consultant(4, "Mariana")).await;
    store.set_consultant_active("Mariana", false).await;
    store
        .push_source_rows(
            "bot",
            vec![
                row("bot", "1", "Caio", "11 93333-0000", Some("Mariana")),
                row("bot", "2", "Bia", "11 93333-1111", Some("Luciana")),
                row("bot", "3", "Rui", "11 93333-2222", Some("Ana - showroom")),
            ],
        )
        .await;
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery));

    let report = engine.run_pass(&[bot()]).await.unwrap();

    assert_eq!(report.totals().unresolved, 2);
    assert_eq!(report.totals().inserted, 1);
    let leads = store.leads().await;
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].phone, "11933332222");
    assert_eq!(leads[0].assigned_consultant_id, ConsultantId(3));
    let processed = store
        .source_rows("bot")
        .await
        .iter()
        .map(|r| r.processed)
        .collect::<Vec<_>>();
    assert_eq!(processed, vec![false, false, true]);
}

/// Delegates to the in-memory store but never finds leads by phone, like a
/// lookup racing a concurrent insert.
struct BlindLookupStore {
    inner: Arc<InMemoryLeadStore>,
}

#[async_trait]
impl LeadStore for BlindLookupStore {
    async fn list_unprocessed(&self, source: &SourceSpec) -> Result<Vec<SourceLeadRow>, StoreError> {
        self.inner.list_unprocessed(source).await
    }

    async fn active_consultants(&self) -> Result<Vec<Consultant>, StoreError> {
        self.inner.active_consultants().await
    }

    async fn find_lead_by_phone(&self, _phone: &str) -> Result<Option<CanonicalLead>, StoreError> {
        Ok(None)
    }

    async fn insert_lead(&self, lead: NewLead) -> Result<LeadId, StoreError> {
        self.inner.insert_lead(lead).await
    }

    async fn mark_processed(&self, source: &SourceSpec, row_id: &str) -> Result<bool, StoreError> {
        self.inner.mark_processed(source, row_id).await
    }

    async fn update_lead_enrichment(
        &self,
        lead_id: LeadId,
        enrichment: &Enrichment,
    ) -> Result<(), StoreError> {
        self.inner.update_lead_enrichment(lead_id, enrichment).await
    }

    async fn list_lead_phones(&self) -> Result<Vec<(String, LeadId)>, StoreError> {
        self.inner.list_lead_phones().await
    }

    async fn list_unclassified_leads(&self, limit: usize) -> Result<Vec<CanonicalLead>, StoreError> {
        self.inner.list_unclassified_leads(limit).await
    }
}

#[tokio::test]
async fn unique_phone_conflict_on_insert_counts_as_existing_lead() {
    let inner = store_with_roster().await;
    inner
        .push_source_rows(
            "bot",
            vec![
                row("bot", "1", "Maria Silva", "(11) 98888-7777", Some("Sergio")),
                row("bot", "2", "Maria S.", "11988887777", Some("Sergio")),
            ],
        )
        .await;
    let store = Arc::new(BlindLookupStore {
        inner: inner.clone(),
    });
    let engine = SyncEngine::new(store, options(DedupMode::PointQuery));

    let report = engine.run_pass(&[bot()]).await.unwrap();

    assert!(matches!(report.rows[0].outcome, RowOutcome::Inserted { .. }));
    assert!(matches!(
        report.rows[1].outcome,
        RowOutcome::AlreadyPresent { .. }
    ));
    let counts = report.totals();
    assert_eq!(counts.inserted, 1);
    assert_eq!(counts.already_present, 1);
    assert_eq!(counts.failed, 0);
    assert_eq!(inner.leads().await.len(), 1);
    assert!(inner.source_rows("bot").await.iter().all(|r| r.processed));
}

#[tokio::test]
async fn ambiguous_label_is_rejected_by_default() {
    let store = store_with_roster().await;
    store
        .push_source_rows("bot", vec![row("bot", "1", "Caio", "11 93333-0000", Some("Ana"))])
        .await;
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery));

    let report = engine.run_pass(&[bot()]).await.unwrap();
    match &report.rows[0].outcome {
        RowOutcome::Ambiguous { candidates, .. } => {
            assert_eq!(candidates, &vec!["Ana Paula".to_string(), "Ana Beatriz".to_string()])
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!store.source_rows("bot").await[0].processed);
}

#[tokio::test]
async fn first_match_policy_assigns_in_roster_order() {
    let store = store_with_roster().await;
    store
        .push_source_rows("bot", vec![row("bot", "1", "Caio", "11 93333-0000", Some("Ana"))])
        .await;
    let engine = SyncEngine::new(
        store.clone(),
        EngineOptions {
            ambiguity: AmbiguityPolicy::FirstMatch,
            ..options(DedupMode::PointQuery)
        },
    );

    engine.run_pass(&[bot()]).await.unwrap();
    assert_eq!(store.leads().await[0].assigned_consultant_id, ConsultantId(3));
}

#[tokio::test]
async fn transient_insert_failures_are_retried() {
    let store = store_with_roster().await;
    store
        .push_source_rows("bot", vec![row("bot", "1", "Rui", "11 92222-0000", Some("Sergio"))])
        .await;
    store.inject_failures(StoreOp::InsertLead, 2).await;
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery));

    let report = engine.run_pass(&[bot()]).await.unwrap();
    assert_eq!(report.totals().inserted, 1);
    assert!(store.source_rows("bot").await[0].processed);
}

#[tokio::test]
async fn failed_row_does_not_stop_the_pass() {
    let store = store_with_roster().await;
    store
        .push_source_rows(
            "bot",
            vec![
                row("bot", "1", "Rui", "11 92222-0000", Some("Sergio")),
                row("bot", "2", "Eva", "11 91111-0000", Some("Sergio")),
            ],
        )
        .await;
    // first row exhausts its retry budget; second row succeeds
    store.inject_failures(StoreOp::InsertLead, 4).await;
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery));

    let report = engine.run_pass(&[bot()]).await.unwrap();
    assert!(matches!(
        report.rows[0].outcome,
        RowOutcome::Failed { stage: FailureStage::Insert, .. }
    ));
    assert!(matches!(report.rows[1].outcome, RowOutcome::Inserted { .. }));
    let rows = store.source_rows("bot").await;
    assert!(!rows[0].processed);
    assert!(rows[1].processed);

    let retry = engine.run_pass(&[bot()]).await.unwrap();
    assert_eq!(retry.totals().inserted, 1);
    assert_eq!(store.leads().await.len(), 2);
}

#[tokio::test]
async fn lost_processed_flag_is_recovered_next_pass() {
    let store = store_with_roster().await;
    store
        .push_source_rows("bot", vec![row("bot", "1", "Rui", "11 92222-0000", Some("Sergio"))])
        .await;
    store.inject_failures(StoreOp::MarkProcessed, 4).await;
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery));

    let report = engine.run_pass(&[bot()]).await.unwrap();
    assert!(matches!(
        report.rows[0].outcome,
        RowOutcome::Failed { stage: FailureStage::MarkProcessed, .. }
    ));
    assert_eq!(store.leads().await.len(), 1);
    assert!(!store.source_rows("bot").await[0].processed);

    let report = engine.run_pass(&[bot()]).await.unwrap();
    assert!(matches!(
        report.rows[0].outcome,
        RowOutcome::AlreadyPresent { lead_id: Some(_) }
    ));
    assert_eq!(store.leads().await.len(), 1);
    assert!(store.source_rows("bot").await[0].processed);
}

#[tokio::test]
async fn one_unlistable_source_is_reported_not_fatal() {
    let store = store_with_roster().await;
    store
        .push_source_rows(
            "legacy",
            vec![row("legacy", "1", "Rui", "11 92222-0000", Some("Sergio"))],
        )
        .await;
    let mut broken = bot();
    broken.columns.phone = "telefone; drop table leads".into();
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery));

    let report = engine.run_pass(&[broken, legacy()]).await.unwrap();
    assert_eq!(report.failed_sources(), 1);
    assert!(report.source("bot").unwrap().listing_error.is_some());
    assert_eq!(report.source("legacy").unwrap().counts.inserted, 1);
}

#[tokio::test]
async fn unreachable_store_fails_the_pass() {
    let store = store_with_roster().await;
    store.inject_failures(StoreOp::ActiveConsultants, 10).await;
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery));
    assert!(matches!(
        engine.run_pass(&[bot()]).await,
        Err(SyncError::StoreUnreachable(_))
    ));

    let store = store_with_roster().await;
    store.inject_failures(StoreOp::ListUnprocessed, 10).await;
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery));
    assert!(matches!(
        engine.run_pass(&[bot(), legacy()]).await,
        Err(SyncError::StoreUnreachable(_))
    ));
}

#[tokio::test]
async fn cancelled_pass_stops_before_touching_rows() {
    let store = store_with_roster().await;
    store
        .push_source_rows("bot", vec![row("bot", "1", "Rui", "11 92222-0000", Some("Sergio"))])
        .await;
    let (tx, rx) = watch::channel(false);
    tx.send_replace(true);
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery));

    let report = engine.run_pass_with_cancel(&[bot()], Some(&rx)).await.unwrap();
    assert!(report.aborted);
    assert!(report.rows.is_empty());
    assert!(store.leads().await.is_empty());
    assert!(!store.source_rows("bot").await[0].processed);
}

const RULES: &str = r#"
version: 1
fallback: cold
rules:
  - label: hot
    contains_any: ["compass"]
"#;

struct CountingClassifier {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl Classifier for CountingClassifier {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn classify(&self, _summary: &str) -> Result<ClassifierVerdict, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ClassifierError::HttpStatus { status: 503 });
        }
        Ok(ClassifierVerdict {
            label: Classification::Warm,
            reasoning: None,
        })
    }
}

#[tokio::test]
async fn inserted_leads_are_classified() {
    let store = store_with_roster().await;
    store
        .push_source_rows("bot", vec![row("bot", "1", "Rui", "11 92222-0000", Some("Sergio"))])
        .await;
    let classifier = Arc::new(KeywordClassifier::from_yaml_str(RULES).unwrap());
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery))
        .with_classifier(classifier);

    engine.run_pass(&[bot()]).await.unwrap();
    let lead = &store.leads().await[0];
    assert_eq!(lead.ai_classification, Classification::Hot);
    assert_eq!(lead.ai_reasoning.as_deref(), Some("matched keyword `compass`"));
}

#[tokio::test]
async fn prior_classification_skips_the_classifier() {
    let store = store_with_roster().await;
    let mut labelled = row("bot", "1", "Rui", "11 92222-0000", Some("Sergio"));
    labelled.prior_classification = Some(Classification::Cold);
    store.push_source_rows("bot", vec![labelled]).await;
    let classifier = Arc::new(CountingClassifier {
        calls: AtomicUsize::new(0),
        fail: false,
    });
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery))
        .with_classifier(classifier.clone());

    engine.run_pass(&[bot()]).await.unwrap();
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.leads().await[0].ai_classification, Classification::Cold);
}

#[tokio::test]
async fn classifier_failure_keeps_neutral_label_and_flag() {
    let store = store_with_roster().await;
    store
        .push_source_rows("bot", vec![row("bot", "1", "Rui", "11 92222-0000", Some("Sergio"))])
        .await;
    let classifier = Arc::new(CountingClassifier {
        calls: AtomicUsize::new(0),
        fail: true,
    });
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery))
        .with_classifier(classifier.clone());

    let report = engine.run_pass(&[bot()]).await.unwrap();
    assert_eq!(report.totals().inserted, 1);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.leads().await[0].ai_classification, Classification::Unclassified);
    assert!(store.source_rows("bot").await[0].processed);
}

#[tokio::test]
async fn backlog_of_unclassified_leads_is_enriched() {
    let store = store_with_roster().await;
    store
        .push_source_rows(
            "bot",
            vec![
                row("bot", "1", "Rui", "11 92222-0000", Some("Sergio")),
                row("bot", "2", "Eva", "11 91111-0000", Some("Sergio")),
            ],
        )
        .await;
    SyncEngine::new(store.clone(), options(DedupMode::PointQuery))
        .run_pass(&[bot()])
        .await
        .unwrap();

    let classifier = Arc::new(CountingClassifier {
        calls: AtomicUsize::new(0),
        fail: false,
    });
    let engine = SyncEngine::new(store.clone(), options(DedupMode::PointQuery))
        .with_classifier(classifier);
    let report = engine.enrich_unclassified(10).await.unwrap();

    assert_eq!(report.candidates, 2);
    assert_eq!(report.classified, 2);
    assert!(store
        .leads()
        .await
        .iter()
        .all(|l| l.ai_classification == Classification::Warm));
    assert_eq!(engine.enrich_unclassified(10).await.unwrap().candidates, 0);
}
