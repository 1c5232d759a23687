//! Extraction run log — persisted JSON timeline of every action taken
//! during a run.
//!
//! Each run produces a single `{DATA_DIR}/extraction-runs/{journal}/{run_id}.json`
//! file containing an ordered list of events with timestamps. The log is the
//! audit trail behind the run report: every skip, conflict and unparsed
//! fragment appears here.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::report::RunReport;

pub struct RunLog {
    pub run_id: String,
    pub journal_code: String,
    pub started_at: DateTime<Utc>,
    events: Vec<RunEvent>,
    seq: u32,
}

#[derive(Serialize)]
struct RunEvent {
    seq: u32,
    ts: DateTime<Utc>,
    #[serde(flatten)]
    kind: EventKind,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ManuscriptChanged {
        entity_id: String,
        previous_fingerprint: Option<String>,
        new_fingerprint: String,
    },
    ManuscriptUnchanged {
        entity_id: String,
    },
    ManuscriptFailed {
        entity_id: String,
        error: String,
    },
    FragmentUnparsed {
        entity_id: String,
        section: String,
        text: String,
    },
    AssignmentMerged {
        assignment_id: String,
        lifecycle_state: String,
        created: bool,
    },
    MergeConflict {
        assignment_id: String,
        left: String,
        right: String,
    },
    OverdueTransition {
        assignment_id: String,
        due: String,
    },
    ConcurrencyConflict {
        entity_id: String,
    },
    EmailMatched {
        assignment_id: String,
        email_id: String,
        score: f64,
    },
    EmailDisagreement {
        assignment_id: String,
        email_id: String,
        detail: String,
    },
}

impl RunLog {
    pub fn new(run_id: String, journal_code: String) -> Self {
        Self {
            run_id,
            journal_code,
            started_at: Utc::now(),
            events: Vec::new(),
            seq: 0,
        }
    }

    pub fn log(&mut self, kind: EventKind) {
        self.events.push(RunEvent {
            seq: self.seq,
            ts: Utc::now(),
            kind,
        });
        self.seq += 1;
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Serialize the run log to JSON and write to disk.
    /// Returns the file path on success.
    pub fn save(&self, data_dir: &Path, report: &RunReport) -> Result<PathBuf> {
        let dir = data_dir.join("extraction-runs").join(&self.journal_code);
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{}.json", self.run_id));

        let output = SerializedRunLog {
            run_id: &self.run_id,
            journal_code: &self.journal_code,
            started_at: self.started_at,
            finished_at: Utc::now(),
            report: SerializedReport::from(report),
            events: &self.events,
        };

        std::fs::write(&path, serde_json::to_string_pretty(&output)?)?;
        info!(path = %path.display(), events = self.events.len(), "extraction run log saved");

        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Serialization wrappers
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SerializedRunLog<'a> {
    run_id: &'a str,
    journal_code: &'a str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    report: SerializedReport,
    events: &'a [RunEvent],
}

#[derive(Serialize)]
struct SerializedReport {
    manuscripts_processed: u32,
    manuscripts_unchanged: u32,
    manuscripts_failed: u32,
    fragments_unparsed: u32,
    assignments_created: u32,
    assignments_updated: u32,
    merge_conflicts: u32,
    changes_recorded: u32,
    emails_matched: u32,
    confidently_updated: Vec<String>,
    flagged_for_review: Vec<String>,
}

impl From<&RunReport> for SerializedReport {
    fn from(r: &RunReport) -> Self {
        Self {
            manuscripts_processed: r.manuscripts_processed,
            manuscripts_unchanged: r.manuscripts_unchanged,
            manuscripts_failed: r.manuscripts_failed,
            fragments_unparsed: r.fragments_unparsed,
            assignments_created: r.assignments_created,
            assignments_updated: r.assignments_updated,
            merge_conflicts: r.merge_conflicts,
            changes_recorded: r.changes_recorded,
            emails_matched: r.emails_matched,
            confidently_updated: r.confidently_updated.clone(),
            flagged_for_review: r.flagged_for_review.clone(),
        }
    }
}
