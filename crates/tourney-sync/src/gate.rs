//! Completeness gate: keeps records in `staging` until the required fields
//! are present, then promotes them to `live`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tourney_core::{RequiredField, TournamentRecord, VisibilityState};
use tourney_storage::{BackoffPolicy, RecordStore, StoreError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::resolver::{RecordFailure, RecordOperation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GateOutcome {
    Promoted,
    AlreadyLive,
    Incomplete { missing: Vec<RequiredField> },
    /// The record vanished, e.g. removed as a duplicate mid-check.
    NotFound,
}

/// Loads `id` and promotes it when complete. Checking a live or missing
/// record is a no-op, not an error.
pub async fn check_record(
    store: &dyn RecordStore,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<GateOutcome, StoreError> {
    match store.get_record(id).await? {
        Some(record) => promote_if_complete(store, record, now).await,
        None => Ok(GateOutcome::NotFound),
    }
}

pub async fn promote_if_complete(
    store: &dyn RecordStore,
    mut record: TournamentRecord,
    now: DateTime<Utc>,
) -> Result<GateOutcome, StoreError> {
    if record.visibility == VisibilityState::Live {
        return Ok(GateOutcome::AlreadyLive);
    }
    let missing = record.missing_fields();
    if !missing.is_empty() {
        return Ok(GateOutcome::Incomplete { missing });
    }

    for state in record.promote(now) {
        info!(record_id = %record.id, name = %record.name, %state, "visibility transition");
    }
    match store.update_record(&record).await {
        Ok(()) => Ok(GateOutcome::Promoted),
        Err(StoreError::NotFound(_)) => Ok(GateOutcome::NotFound),
        Err(err) => Err(err),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub promoted: usize,
    pub deferred: usize,
    pub still_staging: usize,
    pub vanished: usize,
    pub failures: Vec<RecordFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub purged: Vec<Uuid>,
    pub failures: Vec<RecordFailure>,
}

#[derive(Debug, Clone, Copy)]
struct RecheckState {
    attempts: usize,
    next_check_at: DateTime<Utc>,
    seen_updated_at: DateTime<Utc>,
}

/// Staging re-check queue. Incomplete records back off exponentially
/// between sweeps, with no retry limit; a record edited since its last
/// check skips the wait.
pub struct StagingPromoter {
    store: Arc<dyn RecordStore>,
    backoff: BackoffPolicy,
    queue: Mutex<HashMap<Uuid, RecheckState>>,
}

impl StagingPromoter {
    pub fn new(store: Arc<dyn RecordStore>, backoff: BackoffPolicy) -> Self {
        Self {
            store,
            backoff,
            queue: Mutex::new(HashMap::new()),
        }
    }

    /// Immediate re-check after a write; clears any pending backoff.
    pub async fn on_record_written(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<GateOutcome, StoreError> {
        self.queue.lock().await.remove(&id);
        check_record(self.store.as_ref(), id, now).await
    }

    pub async fn pending_rechecks(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let staging = self.store.list_by_visibility(VisibilityState::Staging).await?;
        let mut queue = self.queue.lock().await;
        let staging_ids: HashSet<Uuid> = staging.iter().map(|r| r.id).collect();
        queue.retain(|id, _| staging_ids.contains(id));

        let mut report = SweepReport::default();
        for record in staging {
            let previous = queue.get(&record.id).copied();
            if let Some(state) = previous {
                if state.seen_updated_at == record.updated_at && now < state.next_check_at {
                    report.deferred += 1;
                    continue;
                }
            }

            report.checked += 1;
            let id = record.id;
            let updated_at = record.updated_at;
            match promote_if_complete(self.store.as_ref(), record, now).await {
                Ok(GateOutcome::Promoted) | Ok(GateOutcome::AlreadyLive) => {
                    report.promoted += 1;
                    queue.remove(&id);
                }
                Ok(GateOutcome::NotFound) => {
                    report.vanished += 1;
                    queue.remove(&id);
                }
                Ok(GateOutcome::Incomplete { missing }) => {
                    report.still_staging += 1;
                    let state = self.requeue(previous, updated_at, now);
                    debug!(record_id = %id, ?missing, attempts = state.attempts, next_check_at = %state.next_check_at, "record still incomplete");
                    queue.insert(id, state);
                }
                Err(err) => {
                    let state = self.requeue(previous, updated_at, now);
                    warn!(record_id = %id, error = %err, next_check_at = %state.next_check_at, "promotion write failed");
                    queue.insert(id, state);
                    report
                        .failures
                        .push(RecordFailure::new(id, RecordOperation::Promote, &err));
                }
            }
        }

        if report.promoted > 0 || !report.failures.is_empty() {
            info!(
                checked = report.checked,
                promoted = report.promoted,
                deferred = report.deferred,
                still_staging = report.still_staging,
                failures = report.failures.len(),
                "staging sweep finished"
            );
        }
        Ok(report)
    }

    /// Deletes administrative staging records older than `max_age` that never
    /// promoted. Portal-managed and promoted records are never purged.
    pub async fn purge_stale(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<PurgeReport, StoreError> {
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        let staging = self.store.list_by_visibility(VisibilityState::Staging).await?;
        let mut report = PurgeReport::default();
        for record in staging {
            let stale = !record.managed_by_source
                && record.promoted_at.is_none()
                && now.signed_duration_since(record.created_at) > max_age;
            if !stale {
                continue;
            }
            match self.store.delete_record(record.id).await {
                Ok(()) => {
                    info!(record_id = %record.id, name = %record.name, "purged stale staging record");
                    report.purged.push(record.id);
                }
                Err(StoreError::NotFound(_)) => {}
                Err(err) => {
                    warn!(record_id = %record.id, error = %err, "failed to purge staging record");
                    report
                        .failures
                        .push(RecordFailure::new(record.id, RecordOperation::Delete, &err));
                }
            }
        }
        if !report.purged.is_empty() {
            self.queue
                .lock()
                .await
                .retain(|id, _| !report.purged.contains(id));
        }
        Ok(report)
    }

    /// Next backoff slot. Attempts restart when the record changed since the
    /// previous check.
    fn requeue(
        &self,
        previous: Option<RecheckState>,
        updated_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RecheckState {
        let attempts = match previous {
            Some(state) if state.seen_updated_at == updated_at => state.attempts + 1,
            _ => 1,
        };
        RecheckState {
            attempts,
            next_check_at: now + self.delay_after(attempts),
            seen_updated_at: updated_at,
        }
    }

    fn delay_after(&self, attempts: usize) -> TimeDelta {
        let delay = self.backoff.delay_for_attempt(attempts.saturating_sub(1));
        TimeDelta::from_std(delay).unwrap_or_else(|_| TimeDelta::days(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tourney_storage::InMemoryRecordStore;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).single().unwrap()
    }

    fn staging_record(venue: Option<&str>) -> TournamentRecord {
        let mut record = TournamentRecord::new("Summer Cup", t0());
        record.source_application_id = Some("A1".into());
        record.contact_phone = Some("0123 456789".into());
        record.organizer = Some("County Association".into());
        record.venue = venue.map(str::to_string);
        record
    }

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            max_retries: 0,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(600),
        }
    }

    #[tokio::test]
    async fn missing_record_is_a_quiet_outcome() {
        let store = InMemoryRecordStore::new();
        let outcome = check_record(&store, Uuid::new_v4(), t0()).await.expect("check");
        assert_eq!(outcome, GateOutcome::NotFound);
    }

    #[tokio::test]
    async fn incomplete_records_back_off_between_sweeps() {
        let record = staging_record(None);
        let store = Arc::new(InMemoryRecordStore::with_records(vec![record.clone()]));
        let promoter = StagingPromoter::new(store.clone(), policy());

        let first = promoter.sweep(t0()).await.expect("sweep 1");
        assert_eq!((first.checked, first.still_staging), (1, 1));

        let early = promoter.sweep(t0() + TimeDelta::seconds(10)).await.expect("sweep 2");
        assert_eq!((early.checked, early.deferred), (0, 1));

        let due = promoter.sweep(t0() + TimeDelta::seconds(31)).await.expect("sweep 3");
        assert_eq!(due.checked, 1);

        // second miss doubles the wait
        let doubled = promoter.sweep(t0() + TimeDelta::seconds(80)).await.expect("sweep 4");
        assert_eq!(doubled.deferred, 1);
        assert_eq!(promoter.pending_rechecks().await, 1);
    }

    #[tokio::test]
    async fn edited_record_skips_backoff() {
        let record = staging_record(None);
        let store = Arc::new(InMemoryRecordStore::with_records(vec![record.clone()]));
        let promoter = StagingPromoter::new(store.clone(), policy());
        promoter.sweep(t0()).await.expect("sweep 1");

        let mut edited = record.clone();
        edited.venue = Some("Riverside Hall".into());
        edited.updated_at = t0() + TimeDelta::seconds(5);
        store.update_record(&edited).await.expect("edit");

        let report = promoter.sweep(t0() + TimeDelta::seconds(6)).await.expect("sweep 2");
        assert_eq!(report.promoted, 1);
        assert_eq!(promoter.pending_rechecks().await, 0);
        let stored = store.get_record(record.id).await.expect("get").expect("present");
        assert_eq!(stored.visibility, VisibilityState::Live);
    }

    #[tokio::test]
    async fn conflicting_promotion_backs_off_like_incomplete_records() {
        let mut live = staging_record(Some("Riverside Hall"));
        live.promote(t0() - TimeDelta::hours(1));
        let copy = staging_record(Some("Riverside Hall"));
        let store = Arc::new(InMemoryRecordStore::with_records(vec![live, copy.clone()]));
        let promoter = StagingPromoter::new(store.clone(), policy());

        let first = promoter.sweep(t0()).await.expect("sweep 1");
        assert_eq!(first.checked, 1);
        assert_eq!(first.failures.len(), 1);
        assert_eq!(first.failures[0].record_id, copy.id);
        assert!(first.failures[0].message.contains("second live record"));

        let early = promoter.sweep(t0() + TimeDelta::seconds(10)).await.expect("sweep 2");
        assert_eq!((early.checked, early.deferred), (0, 1));
        assert!(early.failures.is_empty());

        let due = promoter.sweep(t0() + TimeDelta::seconds(31)).await.expect("sweep 3");
        assert_eq!(due.failures.len(), 1);
        assert_eq!(promoter.pending_rechecks().await, 1);
        let stored = store.get_record(copy.id).await.expect("get").expect("present");
        assert_eq!(stored.visibility, VisibilityState::Staging);
    }

    #[tokio::test]
    async fn purge_only_touches_old_unmanaged_staging_rows() {
        let mut stale = TournamentRecord::new("Old Draft", t0() - TimeDelta::hours(2));
        stale.managed_by_source = false;
        let fresh = TournamentRecord::new("New Draft", t0() - TimeDelta::minutes(10));
        let mut managed = staging_record(None);
        managed.managed_by_source = true;
        managed.created_at = t0() - TimeDelta::hours(5);
        let mut live = staging_record(Some("Riverside Hall"));
        live.created_at = t0() - TimeDelta::hours(5);
        live.promote(t0() - TimeDelta::hours(4));

        let store = Arc::new(InMemoryRecordStore::with_records(vec![
            stale.clone(),
            fresh.clone(),
            managed.clone(),
            live.clone(),
        ]));
        let promoter = StagingPromoter::new(store.clone(), policy());
        let report = promoter
            .purge_stale(Duration::from_secs(3600), t0())
            .await
            .expect("purge");

        assert_eq!(report.purged, vec![stale.id]);
        assert_eq!(store.snapshot().await.len(), 3);
    }
}
