//! Survivor selection among local records matched to one application, and removal of the rest.

use std::str::FromStr;

use serde::Serialize;
use tourney_core::TournamentRecord;
use tourney_storage::{RecordStore, StoreError};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurvivorOrder {
    /// Keep whatever order the store returned.
    AsListed,
    /// Sort by `(created_at, id)` so the oldest record wins ties.
    #[default]
    OldestFirst,
}

impl FromStr for SurvivorOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "as-listed" | "as_listed" => Ok(Self::AsListed),
            "oldest-first" | "oldest_first" => Ok(Self::OldestFirst),
            other => Err(format!("unknown survivor order {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub survivor: TournamentRecord,
    pub removed: Vec<TournamentRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOperation {
    Insert,
    Update,
    Delete,
    Promote,
}

/// A single-record write that failed during a pass. Reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub record_id: Uuid,
    pub operation: RecordOperation,
    pub message: String,
}

impl RecordFailure {
    pub fn new(record_id: Uuid, operation: RecordOperation, err: &StoreError) -> Self {
        Self {
            record_id,
            operation,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalOutcome {
    pub removed: Vec<Uuid>,
    /// Already deleted by someone else before we got to it.
    pub already_gone: Vec<Uuid>,
    pub failures: Vec<RecordFailure>,
}

/// Picks the survivor: a promoted candidate linked to `application_id`, else
/// any candidate linked to it, else any candidate carrying a source id, else
/// the first candidate.
/// Returns `None` for an empty candidate list.
pub fn resolve_duplicates(
    application_id: &str,
    mut candidates: Vec<TournamentRecord>,
    order: SurvivorOrder,
) -> Option<Resolution> {
    if candidates.is_empty() {
        return None;
    }
    if order == SurvivorOrder::OldestFirst {
        candidates.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
    }

    let own = |r: &TournamentRecord| r.source_id() == Some(application_id);
    let idx = candidates
        .iter()
        .position(|r| own(r) && r.visibility.is_promoted())
        .or_else(|| candidates.iter().position(|r| own(r)))
        .or_else(|| candidates.iter().position(TournamentRecord::has_source_id))
        .unwrap_or(0);

    if idx == 0 && candidates.len() > 1 && !candidates[0].has_source_id() {
        debug!(
            application_id,
            candidates = candidates.len(),
            "ambiguous duplicates without source id; keeping first"
        );
    }

    let survivor = candidates.remove(idx);
    Some(Resolution {
        survivor,
        removed: candidates,
    })
}

/// Deletes every non-survivor. Each delete stands alone: a failure is
/// recorded and the rest still run, and earlier deletes are not undone.
pub async fn remove_duplicates(store: &dyn RecordStore, resolution: &Resolution) -> RemovalOutcome {
    let mut outcome = RemovalOutcome::default();
    for record in &resolution.removed {
        match store.delete_record(record.id).await {
            Ok(()) => {
                debug!(record_id = %record.id, survivor = %resolution.survivor.id, "removed duplicate");
                outcome.removed.push(record.id);
            }
            Err(StoreError::NotFound(id)) => outcome.already_gone.push(id),
            Err(err) => {
                warn!(record_id = %record.id, error = %err, "failed to remove duplicate");
                outcome
                    .failures
                    .push(RecordFailure::new(record.id, RecordOperation::Delete, &err));
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use tourney_storage::InMemoryRecordStore;

    fn record(name: &str, source: Option<&str>, age_minutes: i64) -> TournamentRecord {
        let base = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).single().unwrap();
        let mut r = TournamentRecord::new(name, base - Duration::minutes(age_minutes));
        r.source_application_id = source.map(str::to_string);
        r
    }

    #[test]
    fn record_with_source_id_survives() {
        let a = record("Summer Cup", None, 30);
        let b = record("Summer Cup", Some("A1"), 10);
        let c = record("Summer Cup", None, 20);
        let res = resolve_duplicates("A1", vec![a.clone(), b.clone(), c.clone()], SurvivorOrder::AsListed)
            .expect("resolution");
        assert_eq!(res.survivor.id, b.id);
        assert_eq!(res.removed, vec![a, c]);
    }

    #[test]
    fn matching_source_id_beats_foreign_source_id() {
        let foreign = record("Summer Cup", Some("A9"), 30);
        let own = record("Summer Cup", Some("A1"), 10);
        let res = resolve_duplicates("A1", vec![foreign, own.clone()], SurvivorOrder::AsListed)
            .expect("resolution");
        assert_eq!(res.survivor.id, own.id);
    }

    #[test]
    fn live_record_outranks_older_staging_copy() {
        let mut live = record("Summer Cup", Some("A1"), 60);
        live.visibility = tourney_core::VisibilityState::Live;
        let staging = record("Summer Cup", Some("A1"), 120);
        let res = resolve_duplicates("A1", vec![live.clone(), staging.clone()], SurvivorOrder::OldestFirst)
            .expect("resolution");
        assert_eq!(res.survivor.id, live.id);
        assert_eq!(res.removed, vec![staging]);
    }

    #[test]
    fn survivor_order_controls_unsourced_ties() {
        let newer = record("Summer Cup", None, 5);
        let older = record("Summer Cup", None, 50);

        let listed = resolve_duplicates("A1", vec![newer.clone(), older.clone()], SurvivorOrder::AsListed)
            .expect("resolution");
        assert_eq!(listed.survivor.id, newer.id);

        let oldest = resolve_duplicates("A1", vec![newer, older.clone()], SurvivorOrder::OldestFirst)
            .expect("resolution");
        assert_eq!(oldest.survivor.id, older.id);
    }

    #[test]
    fn empty_candidates_have_no_resolution() {
        assert!(resolve_duplicates("A1", vec![], SurvivorOrder::OldestFirst).is_none());
    }

    #[tokio::test]
    async fn failed_delete_does_not_stop_the_batch() {
        let survivor = record("Summer Cup", Some("A1"), 40);
        let stuck = record("Summer Cup", None, 30);
        let gone = record("Summer Cup", None, 20);
        let removable = record("Summer Cup", None, 10);
        let store = InMemoryRecordStore::with_records(vec![survivor.clone(), stuck.clone(), removable.clone()]);
        store.fail_delete_of(stuck.id).await;

        let resolution = Resolution {
            survivor: survivor.clone(),
            removed: vec![stuck.clone(), gone.clone(), removable.clone()],
        };
        let outcome = remove_duplicates(&store, &resolution).await;

        assert_eq!(outcome.removed, vec![removable.id]);
        assert_eq!(outcome.already_gone, vec![gone.id]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].record_id, stuck.id);
        assert_eq!(outcome.failures[0].operation, RecordOperation::Delete);
        let left: Vec<Uuid> = store.snapshot().await.iter().map(|r| r.id).collect();
        assert_eq!(left, vec![survivor.id, stuck.id]);
    }
}
