//! Entity resolver — merges partial assignments from the classifier into
//! canonical records, applying status precedence and identity rules.
//!
//! Only this module mutates `Manuscript`/`RefereeAssignment` records. Merge
//! order within a run is the order fragments arrived in, so resolution is
//! deterministic for a given input sequence.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use peerwatch_common::names::normalize_name;
use peerwatch_common::types::{
    AssignmentKey, Manuscript, ManuscriptKey, ManuscriptObservation, RefereeAssignment,
    StateConflict,
};

use crate::classifier::PartialAssignment;

/// What one merge did to one assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Updated,
    Unchanged,
    /// Non-orderable state disagreement. Both states retained, record
    /// flagged; the resolver does not guess.
    Conflict,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ResolveStats {
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub conflicts: u32,
}

/// Result of resolving one manuscript's partials against its stored
/// assignments: the full post-merge assignment set plus counters.
#[derive(Debug)]
pub struct Resolution {
    pub assignments: Vec<RefereeAssignment>,
    pub stats: ResolveStats,
    /// Per-partial outcomes in input order, for run logging.
    pub outcomes: Vec<(AssignmentKey, MergeOutcome)>,
}

/// Merge manuscript-level fields from an observation. First non-empty wins;
/// a later empty observation never erases a populated field (the collector
/// may hand over objects created before its own parsing finished).
/// Returns true if anything changed.
pub fn merge_manuscript_fields(
    manuscript: &mut Manuscript,
    obs: &ManuscriptObservation,
    now: DateTime<Utc>,
) -> bool {
    let mut changed = false;

    let title = obs.title.trim();
    if manuscript.title.is_empty() && !title.is_empty() {
        manuscript.title = title.to_string();
        changed = true;
    }

    let authors: Vec<String> = obs
        .authors
        .iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    if manuscript.authors.is_empty() && !authors.is_empty() {
        manuscript.authors = authors;
        changed = true;
    }

    let status = obs.status.trim();
    if !status.is_empty() && manuscript.status != status {
        manuscript.status = status.to_string();
        changed = true;
    }

    if manuscript.submission_date.is_none() && obs.submission_date.is_some() {
        manuscript.submission_date = obs.submission_date;
        changed = true;
    }

    let editors: Vec<String> = obs
        .editor_names
        .iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect();
    if !editors.is_empty() && manuscript.editor_names != editors {
        manuscript.editor_names = editors;
        changed = true;
    }

    if changed {
        manuscript.last_updated_at = now;
    }
    changed
}

/// Resolve one run's partials for one manuscript against its stored
/// assignments. `existing` is the full stored set; the returned set is the
/// complete post-merge state to persist.
pub fn resolve(
    existing: Vec<RefereeAssignment>,
    partials: &[PartialAssignment],
    manuscript: &ManuscriptKey,
    now: DateTime<Utc>,
) -> Resolution {
    let mut assignments = existing;
    let mut stats = ResolveStats::default();
    let mut outcomes = Vec::new();

    for partial in partials {
        let mut referee = normalize_name(&partial.display_name);
        if referee.is_empty() {
            // Honorific-only or symbolic names normalize away. Keep the raw
            // trimmed text as the key so the record survives for audit.
            referee = partial.display_name.trim().to_lowercase();
        }
        if referee.is_empty() {
            // Whitespace-only text; already counted in the unparsed trail.
            debug!("fragment with no usable name");
            continue;
        }

        let ordinal = pick_ordinal(&assignments, &referee, partial);
        let key = AssignmentKey {
            manuscript: manuscript.clone(),
            referee: referee.clone(),
            ordinal,
        };

        match assignments.iter_mut().find(|a| a.key == key) {
            Some(current) => {
                let outcome = merge_assignment(current, partial, now);
                match outcome {
                    MergeOutcome::Updated => stats.updated += 1,
                    MergeOutcome::Unchanged => stats.unchanged += 1,
                    MergeOutcome::Conflict => stats.conflicts += 1,
                    MergeOutcome::Created => unreachable!(),
                }
                outcomes.push((key, outcome));
            }
            None => {
                outcomes.push((key.clone(), MergeOutcome::Created));
                assignments.push(RefereeAssignment {
                    key,
                    display_name: partial.display_name.clone(),
                    email: partial.email.clone(),
                    institution: None,
                    lifecycle_state: partial.lifecycle_state,
                    state_dates: partial.state_dates,
                    source_section: partial.source_section,
                    conflict: None,
                    reminder_count: 0,
                    last_updated_at: now,
                });
                stats.created += 1;
            }
        }
    }

    Resolution {
        assignments,
        stats,
        outcomes,
    }
}

/// Ordinal assignment. An explicit `#N` from the page is authoritative.
/// Otherwise a partial joins the first existing invitation of the same
/// referee whose date set it is compatible with (subset/superset/equal);
/// a materially different date set is a re-invitation and opens the next
/// ordinal.
fn pick_ordinal(
    assignments: &[RefereeAssignment],
    referee: &str,
    partial: &PartialAssignment,
) -> u32 {
    if let Some(n) = partial.explicit_ordinal {
        return n;
    }

    let mut same_referee: Vec<&RefereeAssignment> = assignments
        .iter()
        .filter(|a| a.key.referee == referee)
        .collect();
    same_referee.sort_by_key(|a| a.key.ordinal);

    for a in &same_referee {
        if a.state_dates.compatible_with(&partial.state_dates) {
            return a.key.ordinal;
        }
    }

    same_referee.last().map(|a| a.key.ordinal + 1).unwrap_or(1)
}

/// Merge one partial into one stored assignment under the status-precedence
/// order. Terminal states are never downgraded; enrichment fields only fill
/// when absent.
pub fn merge_assignment(
    current: &mut RefereeAssignment,
    partial: &PartialAssignment,
    now: DateTime<Utc>,
) -> MergeOutcome {
    let before_state = current.lifecycle_state;
    let before_dates = current.state_dates;
    let before_email = current.email.clone();

    current.state_dates.merge(&partial.state_dates);
    if current.email.is_none() {
        current.email = partial.email.clone();
    }

    let incoming = partial.lifecycle_state;
    let mut conflict = false;

    if incoming != before_state {
        if before_state.conflicts_with(incoming) {
            warn!(
                key = %current.key,
                stored = %before_state,
                observed = %incoming,
                "non-orderable state disagreement, flagging for review"
            );
            current.conflict = Some(StateConflict {
                left: before_state,
                right: incoming,
                detected_at: now,
            });
            conflict = true;
        } else if incoming.precedence() > before_state.precedence() {
            current.lifecycle_state = incoming;
            current.source_section = partial.source_section;
        }
        // Lower-or-equal precedence against a live state: stale page
        // fragment, ignored.
    }

    let changed = current.lifecycle_state != before_state
        || current.state_dates != before_dates
        || current.email != before_email;

    if conflict {
        current.last_updated_at = now;
        return MergeOutcome::Conflict;
    }
    if changed {
        current.last_updated_at = now;
        MergeOutcome::Updated
    } else {
        MergeOutcome::Unchanged
    }
}
