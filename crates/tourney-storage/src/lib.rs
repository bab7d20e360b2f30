//! Website record stores + HTTP fetch utilities.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tourney_core::{TournamentRecord, VisibilityState};
use tracing::{info_span, Instrument};
use uuid::Uuid;

mod file;
mod memory;
mod postgres;

pub use file::FileRecordStore;
pub use memory::InMemoryRecordStore;
pub use postgres::PgRecordStore;

pub const CRATE_NAME: &str = "tourney-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {0} not found")]
    NotFound(Uuid),
    #[error("record {0} already exists")]
    AlreadyExists(Uuid),
    #[error("record {id} would be a second live record for source application {source_application_id}")]
    Conflict {
        id: Uuid,
        source_application_id: String,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Read/write access to the Website's tournament records.
///
/// Each call is atomic for a single record only; callers get no cross-record
/// transactions.
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn list_records(&self) -> Result<Vec<TournamentRecord>, StoreError>;

    async fn list_by_visibility(
        &self,
        state: VisibilityState,
    ) -> Result<Vec<TournamentRecord>, StoreError> {
        Ok(self
            .list_records()
            .await?
            .into_iter()
            .filter(|r| r.visibility == state)
            .collect())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<TournamentRecord>, StoreError>;

    async fn insert_record(&self, record: &TournamentRecord) -> Result<(), StoreError>;

    /// Replaces the stored record with the same id. `NotFound` when it is gone.
    async fn update_record(&self, record: &TournamentRecord) -> Result<(), StoreError>;

    /// Permanent removal. `NotFound` when it is already gone.
    async fn delete_record(&self, id: Uuid) -> Result<(), StoreError>;

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Memory,
    File(PathBuf),
    Postgres { url: String },
}

pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn RecordStore>, StoreError> {
    let store: Arc<dyn RecordStore> = match config {
        StoreConfig::Memory => Arc::new(InMemoryRecordStore::new()),
        StoreConfig::File(path) => Arc::new(FileRecordStore::open(path).await?),
        StoreConfig::Postgres { url } => Arc::new(PgRecordStore::connect(url).await?),
    };
    tracing::debug!(backend = store.backend_name(), "record store opened");
    Ok(store)
}

/// Enforces "one live record per source application" against an in-process record set.
pub(crate) fn check_live_invariant(
    records: &[TournamentRecord],
    candidate: &TournamentRecord,
) -> Result<(), StoreError> {
    if candidate.visibility != VisibilityState::Live {
        return Ok(());
    }
    let Some(source_id) = candidate.source_id() else {
        return Ok(());
    };
    let clash = records.iter().any(|r| {
        r.id != candidate.id && r.visibility == VisibilityState::Live && r.source_id() == Some(source_id)
    });
    if clash {
        return Err(StoreError::Conflict {
            id: candidate.id,
            source_application_id: source_id.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn apply_insert(
    records: &mut Vec<TournamentRecord>,
    record: &TournamentRecord,
) -> Result<(), StoreError> {
    if records.iter().any(|r| r.id == record.id) {
        return Err(StoreError::AlreadyExists(record.id));
    }
    check_live_invariant(records, record)?;
    records.push(record.clone());
    Ok(())
}

pub(crate) fn apply_update(
    records: &mut [TournamentRecord],
    record: &TournamentRecord,
) -> Result<(), StoreError> {
    check_live_invariant(records, record)?;
    let slot = records
        .iter_mut()
        .find(|r| r.id == record.id)
        .ok_or(StoreError::NotFound(record.id))?;
    *slot = record.clone();
    Ok(())
}

pub(crate) fn apply_delete(records: &mut Vec<TournamentRecord>, id: Uuid) -> Result<(), StoreError> {
    let idx = records
        .iter()
        .position(|r| r.id == id)
        .ok_or(StoreError::NotFound(id))?;
    records.remove(idx);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Exponential delay schedule, shared by HTTP retries and the staging re-check queue.
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
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(&self, run_id: Uuid, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, url);
        self.fetch_with_retries(url).instrument(span).await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0usize;
        loop {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tracing::debug!(%status, attempt, "retrying http request");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tracing::debug!(error = %err, attempt, "retrying http request");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn live(name: &str, source: &str) -> TournamentRecord {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single().unwrap();
        let mut record = TournamentRecord::new(name, now);
        record.source_application_id = Some(source.into());
        record.visibility = VisibilityState::Live;
        record
    }

    #[test]
    fn second_live_record_for_same_source_is_rejected() {
        let mut records = vec![live("Summer Cup", "A1")];
        let err = apply_insert(&mut records, &live("Summer Cup (copy)", "A1")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { ref source_application_id, .. } if source_application_id == "A1"));

        let mut staging_copy = live("Summer Cup (copy)", "A1");
        staging_copy.visibility = VisibilityState::Staging;
        apply_insert(&mut records, &staging_copy).expect("staging duplicates are transient, not rejected");
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn update_and_delete_report_missing_records() {
        let mut records = vec![live("Summer Cup", "A1")];
        let ghost = live("Winter Open", "A2");
        assert!(matches!(apply_update(&mut records, &ghost), Err(StoreError::NotFound(id)) if id == ghost.id));
        assert!(matches!(apply_delete(&mut records, ghost.id), Err(StoreError::NotFound(_))));
        let id = records[0].id;
        apply_delete(&mut records, id).expect("delete");
        assert!(records.is_empty());
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }
}
