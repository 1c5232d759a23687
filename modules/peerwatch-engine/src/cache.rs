//! Change-detection cache — decides whether expensive downstream work is
//! necessary by fingerprinting status-relevant content.
//!
//! An "unchanged" verdict is a hard skip signal for network-bound follow-up
//! (detail fetch, document fetch, email lookup), not advisory. The one
//! exemption is time: overdue status changes with no page change at all, so
//! it is recomputed from stored due dates at read time, never gated.

use chrono::{DateTime, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use peerwatch_common::error::PeerwatchError;
use peerwatch_common::types::{
    ChangeRecord, EntityKind, LifecycleState, ManuscriptObservation, RefereeAssignment,
};
use peerwatch_store::{CasOutcome, RecordStore};

// ---------------------------------------------------------------------------
// Fingerprints
// ---------------------------------------------------------------------------

/// Fingerprint of one manuscript observation: a SHA-256 over the minimal
/// status-relevant fields, canonicalized so cosmetic differences (whitespace,
/// author order, fragment order) do not register as change.
pub fn manuscript_fingerprint(obs: &ManuscriptObservation) -> String {
    let mut hasher = Sha256::new();
    hasher.update(obs.journal_code.trim().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(obs.manuscript_id.trim().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(squash(&obs.title).as_bytes());
    hasher.update(b"\x1f");
    for part in sorted_squashed(&obs.authors) {
        hasher.update(part.as_bytes());
        hasher.update(b"\x1e");
    }
    hasher.update(b"\x1f");
    hasher.update(squash(&obs.status).to_lowercase().as_bytes());
    hasher.update(b"\x1f");
    if let Some(d) = obs.submission_date {
        hasher.update(d.to_string().as_bytes());
    }
    hasher.update(b"\x1f");
    for part in sorted_squashed(&obs.editor_names) {
        hasher.update(part.as_bytes());
        hasher.update(b"\x1e");
    }
    hasher.update(b"\x1f");
    let mut frags: Vec<String> = obs
        .fragments
        .iter()
        .map(|f| format!("{}|{}", f.section_label, squash(&f.text)))
        .collect();
    frags.sort();
    for f in frags {
        hasher.update(f.as_bytes());
        hasher.update(b"\x1e");
    }
    hex::encode(hasher.finalize())
}

/// Fingerprint of one resolved assignment's status-relevant state.
pub fn assignment_fingerprint(assignment: &RefereeAssignment) -> String {
    let mut hasher = Sha256::new();
    hasher.update(assignment.key.entity_id().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(assignment.lifecycle_state.to_string().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(assignment.state_dates.signature().as_bytes());
    hex::encode(hasher.finalize())
}

/// Collapse interior whitespace and trim. Cosmetic-only normalization; the
/// words themselves are preserved verbatim.
fn squash(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sorted_squashed(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = items.iter().map(|s| squash(s)).filter(|s| !s.is_empty()).collect();
    out.sort();
    out
}

// ---------------------------------------------------------------------------
// ChangeGate
// ---------------------------------------------------------------------------

/// Verdict for one entity in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Content changed (or first observation). The fingerprint is committed
    /// and a [`ChangeRecord`] appended; downstream work should proceed.
    Changed { record: ChangeRecord },
    /// Semantically identical to the last observation. Downstream work must
    /// be skipped.
    Unchanged,
}

/// Fingerprint gate over the record store. Reads the last committed
/// fingerprint, compares, and commits via compare-and-set so concurrent runs
/// on the same entity cannot lose an update.
pub struct ChangeGate<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> ChangeGate<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    /// Read-only comparison against the stored fingerprint. True when the
    /// stored value already equals `new_fingerprint`.
    pub fn unchanged(&self, entity_id: &str, new_fingerprint: &str) -> Result<bool, PeerwatchError> {
        let stored = self
            .store
            .fingerprint(entity_id)
            .map_err(|e| PeerwatchError::Store(e.to_string()))?;
        Ok(stored.as_deref() == Some(new_fingerprint))
    }

    /// Compare `new_fingerprint` against the stored one and commit on
    /// change. Callers persist their own state first and commit the
    /// fingerprint last; a write that fails midway leaves the old
    /// fingerprint in place, so the next run reprocesses the entity.
    /// A stale compare-and-set is retried once with a fresh read;
    /// failing again is a [`PeerwatchError::ConcurrencyConflict`] and the
    /// caller skips this entity for the run.
    pub fn check(
        &self,
        entity_id: &str,
        kind: EntityKind,
        new_fingerprint: &str,
        summary: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, PeerwatchError> {
        let mut attempts = 0;
        loop {
            let previous = self
                .store
                .fingerprint(entity_id)
                .map_err(|e| PeerwatchError::Store(e.to_string()))?;

            if previous.as_deref() == Some(new_fingerprint) {
                debug!(entity = entity_id, "unchanged, skipping downstream work");
                return Ok(Decision::Unchanged);
            }

            let outcome = self
                .store
                .compare_and_set_fingerprint(
                    entity_id,
                    kind,
                    previous.as_deref(),
                    new_fingerprint,
                )
                .map_err(|e| PeerwatchError::Store(e.to_string()))?;

            match outcome {
                CasOutcome::Committed => {
                    let record = ChangeRecord {
                        id: Uuid::new_v4(),
                        entity_id: entity_id.to_string(),
                        entity_kind: kind,
                        previous_fingerprint: previous.clone(),
                        new_fingerprint: new_fingerprint.to_string(),
                        detected_at: now,
                        change_summary: if previous.is_none() {
                            format!("first observation: {summary}")
                        } else {
                            summary.to_string()
                        },
                    };
                    self.store
                        .append_change(&record)
                        .map_err(|e| PeerwatchError::Store(e.to_string()))?;
                    info!(entity = entity_id, kind = %kind, "change detected");
                    return Ok(Decision::Changed { record });
                }
                CasOutcome::Stale => {
                    attempts += 1;
                    if attempts > 1 {
                        return Err(PeerwatchError::ConcurrencyConflict {
                            entity_id: entity_id.to_string(),
                        });
                    }
                    // Another writer moved the fingerprint since our read.
                    // Re-read once; it may have landed on our value.
                }
            }
        }
    }

    /// Should the caller spend a detail-page fetch on this entity?
    pub fn should_fetch_detail(
        &self,
        entity_id: &str,
        new_fingerprint: &str,
    ) -> Result<bool, PeerwatchError> {
        Ok(!self.unchanged(entity_id, new_fingerprint)?)
    }

    /// Same mechanism keyed by a document reference and its content hash.
    pub fn should_fetch_document(
        &self,
        document_ref: &str,
        content_fingerprint: &str,
    ) -> Result<bool, PeerwatchError> {
        Ok(!self.unchanged(&format!("doc:{document_ref}"), content_fingerprint)?)
    }
}

// ---------------------------------------------------------------------------
// Time-based recomputation (cache-exempt)
// ---------------------------------------------------------------------------

/// Recompute the pending/overdue flip from the stored due date against the
/// current date. Runs at read time regardless of fingerprints, so a stale
/// cache can never hide a newly-overdue assignment.
pub fn effective_state(assignment: &RefereeAssignment, today: NaiveDate) -> LifecycleState {
    match assignment.lifecycle_state {
        LifecycleState::AcceptedPending | LifecycleState::Overdue => {
            match assignment.state_dates.due {
                Some(due) if due < today => LifecycleState::Overdue,
                Some(_) => LifecycleState::AcceptedPending,
                None => assignment.lifecycle_state,
            }
        }
        other => other,
    }
}
