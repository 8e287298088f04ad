//! # Stage History Ledger
//!
//! Append-only record of stage occupancy per project.
//!
//! Every confirmed transition closes the project's open entry
//! (`exited_at = now`, `duration_minutes = now - entered_at`) and opens a new
//! one for the target stage. Both halves are one logical unit: a
//! [`HistoryStore`] applies them together and refuses to leave a second open
//! entry behind.
//!
//! The ledger reads are pure functions over the entry list, so the same
//! timing math serves the engine, the CLI and the HTTP API.

use crate::primitives::{MAX_REASON_LENGTH, MINUTES_PER_DAY};
use crate::sources::HistoryStore;
use crate::{EntryId, ProjectId, StageGateError, StageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// RECORDS
// =============================================================================

/// Input of `record_transition`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub project_id: ProjectId,
    /// `None` for a project's first transition.
    pub from_stage_id: Option<StageId>,
    pub to_stage_id: StageId,
    pub user_id: UserId,
    /// Why the project leaves its current stage. Stored as the exit reason
    /// of the entry being closed.
    pub reason: Option<String>,
    pub bypass_required: bool,
    /// Mandatory when `bypass_required`, absent otherwise.
    pub bypass_reason: Option<String>,
}

impl TransitionRecord {
    /// Enforce the bypass-reason pairing and the text limits.
    pub fn validate(&self) -> Result<(), StageGateError> {
        match (self.bypass_required, self.bypass_reason.as_deref()) {
            (true, None) => {
                return Err(StageGateError::Precondition(
                    "a bypass reason is required when bypassing prerequisites".to_string(),
                ));
            }
            (true, Some(reason)) if reason.trim().is_empty() => {
                return Err(StageGateError::Precondition(
                    "a bypass reason is required when bypassing prerequisites".to_string(),
                ));
            }
            (false, Some(_)) => {
                return Err(StageGateError::InvalidArgument(
                    "bypass reason given for a transition that is not a bypass".to_string(),
                ));
            }
            _ => {}
        }

        for text in [self.reason.as_deref(), self.bypass_reason.as_deref()]
            .into_iter()
            .flatten()
        {
            if text.len() > MAX_REASON_LENGTH {
                return Err(StageGateError::InvalidArgument(format!(
                    "reason exceeds {} bytes",
                    MAX_REASON_LENGTH
                )));
            }
        }
        Ok(())
    }
}

/// One period of a project occupying one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageHistoryEntry {
    pub id: EntryId,
    pub project_id: ProjectId,
    pub from_stage_id: Option<StageId>,
    pub to_stage_id: StageId,
    pub user_id: UserId,
    pub entered_at: DateTime<Utc>,
    /// `None` while the project is still in this stage.
    pub exited_at: Option<DateTime<Utc>>,
    /// Set together with `exited_at`.
    pub duration_minutes: Option<i64>,
    pub bypass_required: bool,
    pub bypass_reason: Option<String>,
    /// Set on close from the `reason` of the transition that left this stage.
    pub exit_reason: Option<String>,
}

impl StageHistoryEntry {
    /// A new open entry for the record's target stage.
    #[must_use]
    pub fn open(id: EntryId, record: &TransitionRecord, now: DateTime<Utc>) -> Self {
        Self {
            id,
            project_id: record.project_id,
            from_stage_id: record.from_stage_id,
            to_stage_id: record.to_stage_id,
            user_id: record.user_id,
            entered_at: now,
            exited_at: None,
            duration_minutes: None,
            bypass_required: record.bypass_required,
            bypass_reason: record.bypass_reason.clone(),
            exit_reason: None,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.exited_at.is_none()
    }

    /// Close the entry at `now`.
    pub fn close(&mut self, now: DateTime<Utc>, exit_reason: Option<String>) {
        self.exited_at = Some(now);
        self.duration_minutes = Some(minutes_between(self.entered_at, now));
        self.exit_reason = exit_reason;
    }

    /// Minutes spent in the stage; an open entry is measured to `now`.
    #[must_use]
    pub fn minutes_spent(&self, now: DateTime<Utc>) -> i64 {
        match (self.duration_minutes, self.exited_at) {
            (Some(minutes), _) => minutes,
            (None, Some(exited)) => minutes_between(self.entered_at, exited),
            (None, None) => minutes_between(self.entered_at, now),
        }
    }
}

fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_minutes().max(0)
}

/// Close `open` (if any) and build the entry that replaces it.
///
/// Shared by the storage backends so both apply identical close-then-open
/// semantics inside their own unit of work.
pub(crate) fn advance_ledger(
    open: Option<StageHistoryEntry>,
    record: &TransitionRecord,
    new_id: EntryId,
    now: DateTime<Utc>,
) -> (Option<StageHistoryEntry>, StageHistoryEntry) {
    let closed = open.map(|mut entry| {
        if Some(entry.to_stage_id) != record.from_stage_id {
            tracing::warn!(
                project = record.project_id.0,
                open_stage = entry.to_stage_id.0,
                from_stage = ?record.from_stage_id.map(|s| s.0),
                "history path is not contiguous; closing open entry anyway"
            );
        }
        entry.close(now, record.reason.clone());
        entry
    });
    (closed, StageHistoryEntry::open(new_id, record, now))
}

// =============================================================================
// LEDGER OPERATIONS
// =============================================================================

/// Validate `record` and append it through `store`.
pub fn record_transition<H: HistoryStore + ?Sized>(
    store: &mut H,
    record: &TransitionRecord,
    now: DateTime<Utc>,
) -> Result<StageHistoryEntry, StageGateError> {
    record.validate()?;
    let entry = store.append_transition(record, now)?;
    tracing::debug!(
        project = record.project_id.0,
        entry = entry.id.0,
        to_stage = record.to_stage_id.0,
        "history entry opened"
    );
    Ok(entry)
}

/// All entries of a project, ascending by `entered_at`.
///
/// More than one open entry is logged as a concurrency anomaly; the entries
/// are returned unchanged either way.
pub fn get_history<H: HistoryStore + ?Sized>(
    store: &H,
    project: ProjectId,
) -> Result<Vec<StageHistoryEntry>, StageGateError> {
    let mut entries = store.entries(project)?;
    entries.sort_by(|a, b| a.entered_at.cmp(&b.entered_at).then(a.id.cmp(&b.id)));

    if let Err(anomaly) = detect_open_anomaly(project, &entries) {
        tracing::error!(project = project.0, error = %anomaly, "stage history anomaly");
    }
    Ok(entries)
}

/// `Err(ConcurrencyAnomaly)` when more than one entry is open.
pub fn detect_open_anomaly(
    project: ProjectId,
    entries: &[StageHistoryEntry],
) -> Result<(), StageGateError> {
    let open_entries = entries.iter().filter(|e| e.is_open()).count();
    if open_entries > 1 {
        return Err(StageGateError::ConcurrencyAnomaly {
            project,
            open_entries,
        });
    }
    Ok(())
}

/// The open entry, if any. With several open entries the latest wins.
#[must_use]
pub fn current_entry(entries: &[StageHistoryEntry]) -> Option<&StageHistoryEntry> {
    entries
        .iter()
        .filter(|e| e.is_open())
        .max_by_key(|e| (e.entered_at, e.id))
}

/// Whole days since the open entry was entered, floored.
#[must_use]
pub fn days_in_current_stage(entries: &[StageHistoryEntry], now: DateTime<Utc>) -> Option<i64> {
    current_entry(entries).map(|entry| entry.minutes_spent(now).div_euclid(MINUTES_PER_DAY))
}

/// One row of a stage timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub stage_id: StageId,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    pub minutes: i64,
    pub bypassed: bool,
}

/// Time spent per entry, in ledger order.
#[must_use]
pub fn stage_timeline(entries: &[StageHistoryEntry], now: DateTime<Utc>) -> Vec<TimelineEntry> {
    entries
        .iter()
        .map(|entry| TimelineEntry {
            stage_id: entry.to_stage_id,
            entered_at: entry.entered_at,
            exited_at: entry.exited_at,
            minutes: entry.minutes_spent(now),
            bypassed: entry.bypass_required,
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
    }

    fn record(from: Option<u64>, to: u64) -> TransitionRecord {
        TransitionRecord {
            project_id: ProjectId(7),
            from_stage_id: from.map(StageId),
            to_stage_id: StageId(to),
            user_id: UserId(1),
            reason: None,
            bypass_required: false,
            bypass_reason: None,
        }
    }

    #[test]
    fn exit_reason_comes_from_the_leaving_transition() {
        let mut store = MemoryStore::new();
        record_transition(&mut store, &record(None, 1), t0()).unwrap();
        let mut leave = record(Some(1), 2);
        leave.reason = Some("Scope agreed".to_string());
        record_transition(&mut store, &leave, t0() + Duration::hours(3)).unwrap();

        let entries = get_history(&store, ProjectId(7)).unwrap();
        assert_eq!(entries[0].exit_reason.as_deref(), Some("Scope agreed"));
        assert_eq!(entries[1].exit_reason, None);
    }

    #[test]
    fn bypass_needs_reason() {
        let mut r = record(Some(1), 2);
        r.bypass_required = true;
        assert!(matches!(r.validate(), Err(StageGateError::Precondition(_))));
        r.bypass_reason = Some("   ".to_string());
        assert!(matches!(r.validate(), Err(StageGateError::Precondition(_))));
        r.bypass_reason = Some("customer escalation".to_string());
        assert!(r.validate().is_ok());
    }

    #[test]
    fn reason_without_bypass_rejected() {
        let mut r = record(Some(1), 2);
        r.bypass_reason = Some("why not".to_string());
        assert!(matches!(r.validate(), Err(StageGateError::InvalidArgument(_))));
    }

    #[test]
    fn sequential_transitions_close_prior_entries() {
        let mut store = MemoryStore::new();
        record_transition(&mut store, &record(None, 1), t0()).unwrap();
        record_transition(&mut store, &record(Some(1), 2), t0() + Duration::minutes(90)).unwrap();
        record_transition(&mut store, &record(Some(2), 3), t0() + Duration::days(2)).unwrap();

        let entries = get_history(&store, ProjectId(7)).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].duration_minutes, Some(90));
        assert_eq!(entries[1].duration_minutes, Some(2 * 1440 - 90));
        assert!(entries[2].is_open());
        assert!(detect_open_anomaly(ProjectId(7), &entries).is_ok());

        let now = t0() + Duration::days(5) + Duration::hours(23);
        assert_eq!(days_in_current_stage(&entries, now), Some(3));
    }

    #[test]
    fn timeline_measures_open_entry_to_now() {
        let mut store = MemoryStore::new();
        record_transition(&mut store, &record(None, 1), t0()).unwrap();
        let entries = get_history(&store, ProjectId(7)).unwrap();

        let timeline = stage_timeline(&entries, t0() + Duration::minutes(45));
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].minutes, 45);
        assert_eq!(timeline[0].exited_at, None);
    }

    #[test]
    fn two_open_entries_are_an_anomaly() {
        let a = StageHistoryEntry::open(EntryId(1), &record(None, 1), t0());
        let b = StageHistoryEntry::open(EntryId(2), &record(Some(1), 2), t0());
        let err = detect_open_anomaly(ProjectId(7), &[a.clone(), b.clone()]).unwrap_err();
        assert_eq!(err.code(), "CONCURRENCY_ANOMALY");
        assert_eq!(current_entry(&[a, b]).unwrap().id, EntryId(2));
    }

    #[test]
    fn no_history_has_no_days() {
        assert_eq!(days_in_current_stage(&[], t0()), None);
    }
}
