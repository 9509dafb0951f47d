//! Group dispatch to the record store and the remote result sink
//!
//! Each group is dispatched in isolation: a failing group never touches its
//! siblings. The local commit and the remote post are deliberately not a
//! transaction. Once the record store has accepted a report it stays
//! accepted; a sink failure marks the group `Failed` so the file retries
//! later, and the idempotent upsert makes the replay safe.

use async_trait::async_trait;
use labfeed_common::{FeedError, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{LabReport, StoredReport};
use crate::validator::ValidationOutcome;

/// Site key used until a previously stored report supplies the real one.
pub const PLACEHOLDER_SITE_KEY: i64 = 0;

/// Persistence seam for committed reports.
///
/// `create_or_update` must be idempotent on the pack reference: dispatching
/// the same pack twice yields one stored record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_by_natural_key(&self, pack_reference: &str) -> Result<Option<StoredReport>>;

    async fn create_or_update(&self, report: LabReport, site_key: i64) -> Result<StoredReport>;
}

/// What happened to one group.
#[derive(Debug, Clone)]
pub enum DispatchResult {
    /// Stored locally and, when a sink is configured, accepted remotely
    Committed(StoredReport),
    /// Rejected by validation; the sink was never contacted
    Skipped(String),
    /// Store or sink failure. A local commit that already happened stands.
    Failed(String),
}

impl DispatchResult {
    pub fn is_committed(&self) -> bool {
        matches!(self, DispatchResult::Committed(_))
    }
}

/// Remote HTTP sink for committed reports.
pub struct ResultSink {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl ResultSink {
    /// Create a sink. The per-call timeout is mandatory; a hung sink must
    /// not stall the whole file.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Config(format!("Failed to build sink client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            timeout,
        })
    }

    /// Post one committed report. Any non-2xx status, transport error or
    /// timeout is a failure.
    pub async fn post_report(&self, stored: &StoredReport) -> anyhow::Result<()> {
        let url = format!("{}/lab-results", self.base_url.trim_end_matches('/'));

        self.client
            .post(&url)
            .timeout(self.timeout)
            .json(stored)
            .send()
            .await?
            .error_for_status()?;

        debug!(pack = %stored.report.pack_reference, "Posted report to result sink");
        Ok(())
    }
}

/// Dispatches validated groups.
pub struct Dispatcher {
    store: Arc<dyn RecordStore>,
    sink: Option<ResultSink>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store, sink: None }
    }

    pub fn with_sink(store: Arc<dyn RecordStore>, sink: ResultSink) -> Self {
        Self {
            store,
            sink: Some(sink),
        }
    }

    /// Dispatch one validation outcome.
    pub async fn dispatch(&self, outcome: ValidationOutcome) -> DispatchResult {
        let report = match outcome {
            ValidationOutcome::Invalid { report, errors } => {
                let reasons = errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                debug!(pack = %report.pack_reference, reasons = %reasons, "Skipping invalid pack");
                return DispatchResult::Skipped(reasons);
            },
            ValidationOutcome::Valid(report) => report,
        };

        let pack = report.pack_reference.clone();

        let site_key = match self.store.find_by_natural_key(&pack).await {
            Ok(Some(existing)) => existing.site_key,
            Ok(None) => {
                warn!(pack = %pack, "No stored report for pack, using placeholder site key");
                PLACEHOLDER_SITE_KEY
            },
            Err(e) => return DispatchResult::Failed(format!("Record lookup failed: {}", e)),
        };

        let stored = match self.store.create_or_update(report, site_key).await {
            Ok(stored) => stored,
            Err(e) => return DispatchResult::Failed(format!("Record commit failed: {}", e)),
        };

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.post_report(&stored).await {
                warn!(pack = %pack, error = %e, "Result sink rejected report, local commit stands");
                return DispatchResult::Failed(format!("Result sink failed: {:#}", e));
            }
        }

        DispatchResult::Committed(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use crate::validator::{validate, FieldError};

    fn valid_report(pack: &str) -> ValidationOutcome {
        let mut report = LabReport::new(pack);
        report.set_analyte("ph_result", "7.2".to_string());
        validate(report)
    }

    #[tokio::test]
    async fn test_invalid_outcome_is_skipped_without_store_contact() {
        let store = Arc::new(MemoryRecordStore::new());
        let dispatcher = Dispatcher::new(store.clone());

        let outcome = ValidationOutcome::Invalid {
            report: LabReport::new("PK1"),
            errors: vec![FieldError::new("results", "No reportable analyte values in pack")],
        };

        match dispatcher.dispatch(outcome).await {
            DispatchResult::Skipped(reason) => assert!(reason.contains("results")),
            other => panic!("expected skipped, got {:?}", other),
        }
        assert!(store.find_by_natural_key("PK1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_first_dispatch_uses_placeholder_key() {
        let store = Arc::new(MemoryRecordStore::new());
        let dispatcher = Dispatcher::new(store.clone());

        match dispatcher.dispatch(valid_report("PK1")).await {
            DispatchResult::Committed(stored) => {
                assert_eq!(stored.site_key, PLACEHOLDER_SITE_KEY);
            },
            other => panic!("expected committed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_redispatch_reuses_existing_site_key() {
        let store = Arc::new(MemoryRecordStore::new());
        store.seed("PK1", 42).await;
        let dispatcher = Dispatcher::new(store.clone());

        match dispatcher.dispatch(valid_report("PK1")).await {
            DispatchResult::Committed(stored) => assert_eq!(stored.site_key, 42),
            other => panic!("expected committed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_redispatch_is_one_record() {
        let store = Arc::new(MemoryRecordStore::new());
        let dispatcher = Dispatcher::new(store.clone());

        dispatcher.dispatch(valid_report("PK1")).await;
        dispatcher.dispatch(valid_report("PK1")).await;

        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_sink_accepting_post_commits() {
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/lab-results"))
            .and(body_partial_json(serde_json::json!({
                "site_key": 0,
                "report": { "pack_reference": "PK1" }
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryRecordStore::new());
        let sink = ResultSink::new(server.uri(), Duration::from_secs(5)).unwrap();
        let dispatcher = Dispatcher::with_sink(store.clone(), sink);

        assert!(dispatcher.dispatch(valid_report("PK1")).await.is_committed());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_sink_rejection_fails_group_but_keeps_local_commit() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/lab-results"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryRecordStore::new());
        let sink = ResultSink::new(server.uri(), Duration::from_secs(5)).unwrap();
        let dispatcher = Dispatcher::with_sink(store.clone(), sink);

        match dispatcher.dispatch(valid_report("PK1")).await {
            DispatchResult::Failed(reason) => assert!(reason.contains("Result sink")),
            other => panic!("expected failed, got {:?}", other),
        }
        // The record store keeps the report even though the sink said no.
        assert!(store.find_by_natural_key("PK1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sink_timeout_is_a_dispatch_failure() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/lab-results"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryRecordStore::new());
        let sink = ResultSink::new(server.uri(), Duration::from_millis(100)).unwrap();
        let dispatcher = Dispatcher::with_sink(store.clone(), sink);

        match dispatcher.dispatch(valid_report("PK1")).await {
            DispatchResult::Failed(_) => {}
            other => panic!("expected failed, got {:?}", other),
        }
    }
}
