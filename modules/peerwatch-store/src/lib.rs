//! Extraction Record Store — the persistence boundary behind the engine.
//!
//! The engine only ever does get/put-by-id, append-only change writes, and
//! compare-and-set fingerprint commits, so any backend with per-key atomic
//! read-modify-write can implement [`RecordStore`]. [`MemoryStore`] is the
//! reference implementation used by tests and single-process runs.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;

use peerwatch_common::types::{
    AssignmentKey, ChangeRecord, EmailMatch, EntityKind, Manuscript, ManuscriptKey,
    RefereeAssignment,
};

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

/// Outcome of a compare-and-set fingerprint commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The expected fingerprint matched (or the slot was empty as expected)
    /// and the new value was committed.
    Committed,
    /// The stored fingerprint no longer matches what the caller read. The
    /// caller must re-read before retrying.
    Stale,
}

/// Persistence contract consumed by the engine. Implementations must provide
/// per-key atomic read-modify-write; two runs racing on the same entity must
/// not lose an update silently — one of them sees [`CasOutcome::Stale`].
pub trait RecordStore: Send + Sync {
    // --- Canonical entities ---

    fn get_manuscript(&self, key: &ManuscriptKey) -> Result<Option<Manuscript>>;

    fn put_manuscript(&self, manuscript: &Manuscript) -> Result<()>;

    fn get_assignment(&self, key: &AssignmentKey) -> Result<Option<RefereeAssignment>>;

    fn put_assignment(&self, assignment: &RefereeAssignment) -> Result<()>;

    /// All stored assignments for one manuscript, in stable (referee,
    /// ordinal) order.
    fn assignments_for_manuscript(&self, key: &ManuscriptKey) -> Result<Vec<RefereeAssignment>>;

    // --- Fingerprints ---

    /// Last committed fingerprint for an entity id, if any.
    fn fingerprint(&self, entity_id: &str) -> Result<Option<String>>;

    /// Commit `new` only if the stored fingerprint still equals `expected`
    /// (`None` = no fingerprint stored yet). Committing an identical value
    /// over itself is idempotent and reports `Committed`.
    fn compare_and_set_fingerprint(
        &self,
        entity_id: &str,
        kind: EntityKind,
        expected: Option<&str>,
        new: &str,
    ) -> Result<CasOutcome>;

    // --- Change log ---

    /// Append-only. ChangeRecords are never mutated or deleted.
    fn append_change(&self, record: &ChangeRecord) -> Result<()>;

    fn changes(&self) -> Result<Vec<ChangeRecord>>;

    // --- Email overlay ---

    fn append_email_match(&self, record: &EmailMatch) -> Result<()>;

    fn email_matches(&self) -> Result<Vec<EmailMatch>>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    manuscripts: HashMap<ManuscriptKey, Manuscript>,
    assignments: HashMap<AssignmentKey, RefereeAssignment>,
    fingerprints: HashMap<String, (EntityKind, String)>,
    changes: Vec<ChangeRecord>,
    email_matches: Vec<EmailMatch>,
}

/// In-memory store with real compare-and-set semantics. One mutex guards the
/// whole map set, which trivially satisfies the per-key atomicity contract.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn get_manuscript(&self, key: &ManuscriptKey) -> Result<Option<Manuscript>> {
        Ok(self.inner.lock().unwrap().manuscripts.get(key).cloned())
    }

    fn put_manuscript(&self, manuscript: &Manuscript) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .manuscripts
            .insert(manuscript.key.clone(), manuscript.clone());
        Ok(())
    }

    fn get_assignment(&self, key: &AssignmentKey) -> Result<Option<RefereeAssignment>> {
        Ok(self.inner.lock().unwrap().assignments.get(key).cloned())
    }

    fn put_assignment(&self, assignment: &RefereeAssignment) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .assignments
            .insert(assignment.key.clone(), assignment.clone());
        Ok(())
    }

    fn assignments_for_manuscript(&self, key: &ManuscriptKey) -> Result<Vec<RefereeAssignment>> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<RefereeAssignment> = inner
            .assignments
            .values()
            .filter(|a| &a.key.manuscript == key)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (&a.key.referee, a.key.ordinal).cmp(&(&b.key.referee, b.key.ordinal))
        });
        Ok(out)
    }

    fn fingerprint(&self, entity_id: &str) -> Result<Option<String>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .fingerprints
            .get(entity_id)
            .map(|(_, fp)| fp.clone()))
    }

    fn compare_and_set_fingerprint(
        &self,
        entity_id: &str,
        kind: EntityKind,
        expected: Option<&str>,
        new: &str,
    ) -> Result<CasOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let current = inner.fingerprints.get(entity_id).map(|(_, fp)| fp.as_str());
        if current == expected || current == Some(new) {
            inner
                .fingerprints
                .insert(entity_id.to_string(), (kind, new.to_string()));
            Ok(CasOutcome::Committed)
        } else {
            Ok(CasOutcome::Stale)
        }
    }

    fn append_change(&self, record: &ChangeRecord) -> Result<()> {
        self.inner.lock().unwrap().changes.push(record.clone());
        Ok(())
    }

    fn changes(&self) -> Result<Vec<ChangeRecord>> {
        Ok(self.inner.lock().unwrap().changes.clone())
    }

    fn append_email_match(&self, record: &EmailMatch) -> Result<()> {
        self.inner.lock().unwrap().email_matches.push(record.clone());
        Ok(())
    }

    fn email_matches(&self) -> Result<Vec<EmailMatch>> {
        Ok(self.inner.lock().unwrap().email_matches.clone())
    }
}
