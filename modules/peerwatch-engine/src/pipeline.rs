//! The per-run extraction pipeline: classifier → resolver → change gate →
//! store, with email reconciliation as optional enrichment afterwards.
//!
//! Failures are scoped to the entity being processed. One manuscript's
//! failure never aborts its siblings; every outcome is counted in the
//! [`RunReport`] and logged to the [`RunLog`].

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use peerwatch_common::config::Config;
use peerwatch_common::error::PeerwatchError;
use peerwatch_common::types::{
    EmailRecord, EntityKind, Manuscript, ManuscriptKey, ManuscriptObservation,
};
use peerwatch_store::RecordStore;

use crate::cache::{
    assignment_fingerprint, effective_state, manuscript_fingerprint, ChangeGate, Decision,
};
use crate::classifier::{classify, PartialAssignment};
use crate::reconcile::Reconciler;
use crate::report::RunReport;
use crate::resolver::{merge_manuscript_fields, resolve, MergeOutcome};
use crate::run_log::{EventKind, RunLog};

pub struct ExtractionPipeline<'a> {
    store: &'a dyn RecordStore,
    config: Config,
}

impl<'a> ExtractionPipeline<'a> {
    pub fn new(store: &'a dyn RecordStore, config: Config) -> Self {
        Self { store, config }
    }

    /// Process one run's observations sequentially. Observations for
    /// different manuscripts are independent; callers may shard a large run
    /// across pipelines at manuscript granularity.
    pub fn run(
        &self,
        run_id: &str,
        journal_code: &str,
        observations: &[ManuscriptObservation],
        now: DateTime<Utc>,
    ) -> (RunReport, RunLog) {
        let mut report = RunReport::default();
        let mut log = RunLog::new(run_id.to_string(), journal_code.to_string());

        for obs in observations {
            let entity_id = obs.key().entity_id();
            match self.process_observation(obs, now, &mut report, &mut log) {
                Ok(()) => {}
                Err(PeerwatchError::ConcurrencyConflict { entity_id }) => {
                    warn!(entity = %entity_id, "fingerprint race lost twice, skipping for this run");
                    report.concurrency_conflicts += 1;
                    log.log(EventKind::ConcurrencyConflict { entity_id });
                }
                Err(e) => {
                    error!(entity = %entity_id, error = %e, "manuscript processing failed");
                    report.manuscripts_failed += 1;
                    log.log(EventKind::ManuscriptFailed {
                        entity_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        (report, log)
    }

    fn process_observation(
        &self,
        obs: &ManuscriptObservation,
        now: DateTime<Utc>,
        report: &mut RunReport,
        log: &mut RunLog,
    ) -> Result<(), PeerwatchError> {
        if obs.manuscript_id.trim().is_empty() || obs.journal_code.trim().is_empty() {
            return Err(PeerwatchError::Validation(
                "observation carries no manuscript id or journal code".to_string(),
            ));
        }

        let key = obs.key();
        let entity_id = key.entity_id();
        let gate = ChangeGate::new(self.store);

        let fingerprint = manuscript_fingerprint(obs);
        if gate.unchanged(&entity_id, &fingerprint)? {
            report.manuscripts_unchanged += 1;
            log.log(EventKind::ManuscriptUnchanged {
                entity_id: entity_id.clone(),
            });
            // Overdue flips on elapsed time alone, so the unchanged
            // short-circuit must not gate this recomputation.
            self.refresh_overdue(&key, now, report, log)?;
            return Ok(());
        }

        report.manuscripts_processed += 1;

        let today = now.date_naive();
        let mut partials: Vec<PartialAssignment> = Vec::with_capacity(obs.fragments.len());
        let mut any_unparsed = false;
        for fragment in &obs.fragments {
            let partial = classify(fragment, self.config.unlabeled_policy, today);
            if partial.parsed {
                report.fragments_classified += 1;
            } else {
                any_unparsed = true;
                report.fragments_unparsed += 1;
                report.unparsed.push(fragment.text.clone());
                log.log(EventKind::FragmentUnparsed {
                    entity_id: entity_id.clone(),
                    section: fragment.section_label.to_string(),
                    text: fragment.text.clone(),
                });
            }
            partials.push(partial);
        }

        let mut manuscript = self
            .store
            .get_manuscript(&key)
            .map_err(|e| PeerwatchError::Store(e.to_string()))?
            .unwrap_or_else(|| Manuscript::new(key.clone(), now));
        merge_manuscript_fields(&mut manuscript, obs, now);

        let existing = self
            .store
            .assignments_for_manuscript(&key)
            .map_err(|e| PeerwatchError::Store(e.to_string()))?;
        let resolution = resolve(existing, &partials, &key, now);

        let mut any_conflict = false;
        for (assignment_key, outcome) in &resolution.outcomes {
            match outcome {
                MergeOutcome::Created | MergeOutcome::Updated => {
                    let state = resolution
                        .assignments
                        .iter()
                        .find(|a| &a.key == assignment_key)
                        .map(|a| a.lifecycle_state.to_string())
                        .unwrap_or_default();
                    log.log(EventKind::AssignmentMerged {
                        assignment_id: assignment_key.entity_id(),
                        lifecycle_state: state,
                        created: *outcome == MergeOutcome::Created,
                    });
                }
                MergeOutcome::Conflict => {
                    any_conflict = true;
                    if let Some(c) = resolution
                        .assignments
                        .iter()
                        .find(|a| &a.key == assignment_key)
                        .and_then(|a| a.conflict)
                    {
                        log.log(EventKind::MergeConflict {
                            assignment_id: assignment_key.entity_id(),
                            left: c.left.to_string(),
                            right: c.right.to_string(),
                        });
                    }
                    report.flag(&assignment_key.entity_id());
                }
                MergeOutcome::Unchanged => {}
            }
        }
        report.assignments_created += resolution.stats.created;
        report.assignments_updated += resolution.stats.updated;
        report.merge_conflicts += resolution.stats.conflicts;

        let mut keys: Vec<_> = resolution.assignments.iter().map(|a| a.key.clone()).collect();
        keys.sort_by(|a, b| (&a.referee, a.ordinal).cmp(&(&b.referee, b.ordinal)));
        manuscript.referee_assignment_ids = keys;
        manuscript.last_seen_fingerprint = Some(fingerprint.clone());

        for assignment in &resolution.assignments {
            self.store
                .put_assignment(assignment)
                .map_err(|e| PeerwatchError::Store(e.to_string()))?;
        }
        self.store
            .put_manuscript(&manuscript)
            .map_err(|e| PeerwatchError::Store(e.to_string()))?;

        // Fingerprints commit only after every write above landed. A failed
        // write leaves the old fingerprints in place and the next run
        // reprocesses this manuscript from scratch.
        for assignment in &resolution.assignments {
            gate.check(
                &assignment.key.entity_id(),
                EntityKind::Assignment,
                &assignment_fingerprint(assignment),
                &assignment.lifecycle_state.to_string(),
                now,
            )?;
        }
        let summary = format!(
            "status '{}', {} fragments",
            obs.status.trim(),
            obs.fragments.len()
        );
        if let Decision::Changed { record } =
            gate.check(&entity_id, EntityKind::Manuscript, &fingerprint, &summary, now)?
        {
            report.changes_recorded += 1;
            log.log(EventKind::ManuscriptChanged {
                entity_id: entity_id.clone(),
                previous_fingerprint: record.previous_fingerprint.clone(),
                new_fingerprint: record.new_fingerprint,
            });
        }

        self.refresh_overdue(&key, now, report, log)?;

        // Conflicted assignments were flagged above; unparsed fragments sit
        // in the report's unparsed list. Everything else is confident.
        if !any_conflict && !any_unparsed {
            report.confidently_updated.push(entity_id);
        }

        Ok(())
    }

    /// Recompute pending/overdue from stored due dates against the current
    /// date and persist any flips. Runs even when the page is unchanged.
    fn refresh_overdue(
        &self,
        key: &ManuscriptKey,
        now: DateTime<Utc>,
        report: &mut RunReport,
        log: &mut RunLog,
    ) -> Result<(), PeerwatchError> {
        let today = now.date_naive();
        let gate = ChangeGate::new(self.store);
        let assignments = self
            .store
            .assignments_for_manuscript(key)
            .map_err(|e| PeerwatchError::Store(e.to_string()))?;

        for mut assignment in assignments {
            let effective = effective_state(&assignment, today);
            if effective != assignment.lifecycle_state {
                assignment.lifecycle_state = effective;
                assignment.last_updated_at = now;
                report.overdue_transitions += 1;
                log.log(EventKind::OverdueTransition {
                    assignment_id: assignment.key.entity_id(),
                    due: assignment
                        .state_dates
                        .due
                        .map(|d| d.to_string())
                        .unwrap_or_default(),
                });
                self.store
                    .put_assignment(&assignment)
                    .map_err(|e| PeerwatchError::Store(e.to_string()))?;
                gate.check(
                    &assignment.key.entity_id(),
                    EntityKind::Assignment,
                    &assignment_fingerprint(&assignment),
                    &assignment.lifecycle_state.to_string(),
                    now,
                )?;
            }
        }
        Ok(())
    }

    /// Reconcile every assignment of one manuscript against candidate email
    /// records from the external search collaborator. Enrichment only: fills
    /// empty email fields, updates reminder counts, records matches and
    /// disagreements for audit.
    pub fn reconcile_emails(
        &self,
        key: &ManuscriptKey,
        candidates: &[EmailRecord],
        report: &mut RunReport,
        log: &mut RunLog,
    ) -> Result<(), PeerwatchError> {
        let reconciler = Reconciler::new(&self.config);
        let assignments = self
            .store
            .assignments_for_manuscript(key)
            .map_err(|e| PeerwatchError::Store(e.to_string()))?;

        for mut assignment in assignments {
            let outcome = reconciler.reconcile(&assignment, candidates);
            let mut dirty = false;

            if let Some(email) = outcome.fill_email {
                assignment.email = Some(email);
                dirty = true;
            }
            if outcome.reminder_count != assignment.reminder_count {
                assignment.reminder_count = outcome.reminder_count;
                dirty = true;
            }

            if let Some(m) = outcome.best_match {
                report.emails_matched += 1;
                log.log(EventKind::EmailMatched {
                    assignment_id: m.assignment_id.clone(),
                    email_id: m.candidate_email_id.clone(),
                    score: m.match_score,
                });
                if let Some(detail) = &m.disagreement {
                    report.email_disagreements += 1;
                    report.flag(&m.assignment_id);
                    log.log(EventKind::EmailDisagreement {
                        assignment_id: m.assignment_id.clone(),
                        email_id: m.candidate_email_id.clone(),
                        detail: detail.clone(),
                    });
                }
                self.store
                    .append_email_match(&m)
                    .map_err(|e| PeerwatchError::Store(e.to_string()))?;
            }

            if dirty {
                assignment.last_updated_at = Utc::now();
                self.store
                    .put_assignment(&assignment)
                    .map_err(|e| PeerwatchError::Store(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Should the caller spend a detail-page fetch on this entity?
    /// Backed by the fingerprint store; "no" is a hard skip signal.
    pub fn should_fetch_detail(
        &self,
        entity_id: &str,
        new_fingerprint: &str,
    ) -> Result<bool, PeerwatchError> {
        ChangeGate::new(self.store).should_fetch_detail(entity_id, new_fingerprint)
    }

    /// Same mechanism keyed by a document reference and its content hash.
    pub fn should_fetch_document(
        &self,
        document_ref: &str,
        content_fingerprint: &str,
    ) -> Result<bool, PeerwatchError> {
        ChangeGate::new(self.store).should_fetch_document(document_ref, content_fingerprint)
    }
}
