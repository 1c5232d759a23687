//! Email reconciliation — best-effort correlation of referee assignments
//! against an externally supplied email timeline.
//!
//! Reconciliation only ever enriches: it may fill a missing email address
//! and it surfaces disagreements for audit, but it never originates or
//! overrides lifecycle state derived from the page.

use std::collections::HashSet;

use chrono::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use peerwatch_common::config::Config;
use peerwatch_common::names::name_tokens;
use peerwatch_common::types::{
    EmailClass, EmailMatch, EmailRecord, LifecycleState, RefereeAssignment,
};

/// Result of reconciling one assignment against one candidate set.
#[derive(Debug)]
pub struct ReconcileOutcome {
    /// Best candidate clearing the threshold, if any. Absence is the normal
    /// low-confidence outcome, not an error.
    pub best_match: Option<EmailMatch>,
    /// Address to write into the assignment, only when it was empty.
    pub fill_email: Option<String>,
    /// Distinct reminder emails referencing this referee and manuscript.
    pub reminder_count: u32,
}

pub struct Reconciler {
    threshold: f64,
    window: Duration,
}

impl Reconciler {
    pub fn new(config: &Config) -> Self {
        Self {
            threshold: config.match_threshold,
            window: Duration::days(config.match_window_days),
        }
    }

    /// Score every candidate email against one assignment and keep the best
    /// one above the threshold. Candidates that do not reference the
    /// manuscript id are excluded outright — an email about a different
    /// manuscript never attaches here, whatever the name similarity.
    pub fn reconcile(
        &self,
        assignment: &RefereeAssignment,
        candidates: &[EmailRecord],
    ) -> ReconcileOutcome {
        let manuscript_id = &assignment.key.manuscript.id;
        let tokens: Vec<&str> = name_tokens(&assignment.key.referee);

        let linked: Vec<&EmailRecord> = candidates
            .iter()
            .filter(|e| e.referenced_manuscript_ids.iter().any(|m| m == manuscript_id))
            .collect();

        // Distinct by email id; search results may repeat a record.
        let mut seen_reminders = HashSet::new();
        let reminder_count = linked
            .iter()
            .filter(|e| e.classified_type == EmailClass::Reminder)
            .filter(|e| name_appears(e, &tokens))
            .filter(|e| seen_reminders.insert(e.id.as_str()))
            .count() as u32;

        let mut best: Option<(f64, Vec<String>, &EmailRecord)> = None;
        for email in &linked {
            let (score, fields) = self.score(assignment, email, &tokens);
            debug!(email = %email.id, score, "candidate scored");
            let better = match &best {
                Some((s, _, b)) => {
                    score > *s || (score == *s && email.timestamp < b.timestamp)
                }
                None => true,
            };
            if better {
                best = Some((score, fields, email));
            }
        }

        let Some((score, matched_fields, email)) = best else {
            return ReconcileOutcome {
                best_match: None,
                fill_email: None,
                reminder_count,
            };
        };

        if score < self.threshold {
            debug!(
                assignment = %assignment.key,
                score,
                "no candidate cleared the threshold"
            );
            return ReconcileOutcome {
                best_match: None,
                fill_email: None,
                reminder_count,
            };
        }

        let candidate_address = referee_address(email, &tokens);
        let (fill_email, disagreement) = match (&assignment.email, &candidate_address) {
            (None, Some(addr)) => (Some(addr.clone()), None),
            (Some(known), Some(addr)) if !known.eq_ignore_ascii_case(addr) => {
                // Known address wins; the disagreement is recorded, never
                // auto-resolved.
                (None, Some(format!("known {known}, email suggests {addr}")))
            }
            _ => (None, None),
        };

        info!(
            assignment = %assignment.key,
            email = %email.id,
            score,
            "email match verified"
        );

        ReconcileOutcome {
            best_match: Some(EmailMatch {
                id: Uuid::new_v4(),
                assignment_id: assignment.key.entity_id(),
                candidate_email_id: email.id.clone(),
                match_score: score,
                matched_fields,
                verified: true,
                disagreement,
            }),
            fill_email,
            reminder_count,
        }
    }

    fn score(
        &self,
        assignment: &RefereeAssignment,
        email: &EmailRecord,
        tokens: &[&str],
    ) -> (f64, Vec<String>) {
        let mut score = 0.0;
        let mut fields = Vec::new();

        if name_appears(email, tokens) {
            score += 0.4;
            fields.push("name".to_string());
        }

        if class_aligns(email.classified_type, assignment.lifecycle_state) {
            score += 0.3;
            fields.push("type".to_string());
        }

        if let Some(anchor) = relevant_date(email.classified_type, assignment) {
            let delta = (email.timestamp.date_naive() - anchor).abs();
            if delta <= self.window {
                score += 0.3;
                fields.push("timestamp".to_string());
            }
        }

        (score, fields)
    }
}

fn name_appears(email: &EmailRecord, tokens: &[&str]) -> bool {
    if tokens.is_empty() {
        return false;
    }
    let mut haystack = email.subject.to_lowercase();
    haystack.push(' ');
    haystack.push_str(&email.sender.to_lowercase());
    for r in &email.recipients {
        haystack.push(' ');
        haystack.push_str(&r.to_lowercase());
    }
    tokens.iter().any(|t| haystack.contains(t))
}

/// Does the collaborator's email classification fit the assignment's current
/// or prior lifecycle state? An invitation fits every assignment (all were
/// invited once); a submission only fits a submitted report.
fn class_aligns(class: EmailClass, state: LifecycleState) -> bool {
    use LifecycleState::*;
    match class {
        EmailClass::Invitation => state != Unknown,
        EmailClass::Reminder => matches!(state, AcceptedPending | Overdue | ReportSubmitted),
        EmailClass::Response => {
            matches!(state, Declined | AcceptedPending | Overdue | ReportSubmitted)
        }
        EmailClass::Submission => state == ReportSubmitted,
        EmailClass::Other => false,
    }
}

/// The state date an email of this class should land near.
fn relevant_date(
    class: EmailClass,
    assignment: &RefereeAssignment,
) -> Option<chrono::NaiveDate> {
    let d = &assignment.state_dates;
    match class {
        EmailClass::Invitation => d.contacted,
        EmailClass::Reminder => d.due.or(d.contacted),
        EmailClass::Response => d.responded.or(d.contacted),
        EmailClass::Submission => d.completed,
        EmailClass::Other => None,
    }
}

/// Pick the address in the email that plausibly belongs to the referee: for
/// responses/submissions the referee is the sender, for invitations and
/// reminders a recipient. Falls back to any address whose local part carries
/// a name token.
fn referee_address(email: &EmailRecord, tokens: &[&str]) -> Option<String> {
    let ordered: Vec<&String> = match email.classified_type {
        EmailClass::Response | EmailClass::Submission => std::iter::once(&email.sender)
            .chain(email.recipients.iter())
            .collect(),
        _ => email.recipients.iter().chain(std::iter::once(&email.sender)).collect(),
    };
    ordered
        .iter()
        .find(|addr| {
            let local = addr.split('@').next().unwrap_or("").to_lowercase();
            tokens.iter().any(|t| local.contains(t))
        })
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use peerwatch_common::types::{
        AssignmentKey, ManuscriptKey, SectionLabel, StateDates,
    };

    fn assignment(state: LifecycleState, dates: StateDates) -> RefereeAssignment {
        RefereeAssignment {
            key: AssignmentKey {
                manuscript: ManuscriptKey {
                    id: "M-1001".to_string(),
                    journal_code: "JPC".to_string(),
                },
                referee: "marie daudin".to_string(),
                ordinal: 1,
            },
            display_name: "Dr. Marie Daudin".to_string(),
            email: None,
            institution: None,
            lifecycle_state: state,
            state_dates: dates,
            source_section: SectionLabel::ActivePool,
            conflict: None,
            reminder_count: 0,
            last_updated_at: Utc::now(),
        }
    }

    fn email(
        id: &str,
        class: EmailClass,
        sender: &str,
        recipients: &[&str],
        day: u32,
        manuscripts: &[&str],
    ) -> EmailRecord {
        EmailRecord {
            id: id.to_string(),
            subject: "Re: manuscript M-1001 review".to_string(),
            sender: sender.to_string(),
            recipients: recipients.iter().map(|s| s.to_string()).collect(),
            timestamp: Utc.with_ymd_and_hms(2025, 2, day, 9, 0, 0).unwrap(),
            classified_type: class,
            referenced_manuscript_ids: manuscripts.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(&Config::default())
    }

    fn contacted_feb4() -> StateDates {
        StateDates {
            contacted: NaiveDate::from_ymd_opt(2025, 2, 4),
            ..Default::default()
        }
    }

    #[test]
    fn foreign_manuscript_emails_never_attach() {
        let a = assignment(LifecycleState::Invited, contacted_feb4());
        let e = email(
            "e1",
            EmailClass::Invitation,
            "editor@journal.example",
            &["daudin@univ.example"],
            4,
            &["M-9999"],
        );
        let out = reconciler().reconcile(&a, &[e]);
        assert!(out.best_match.is_none());
        assert_eq!(out.reminder_count, 0);
    }

    #[test]
    fn aligned_invitation_near_contact_date_verifies() {
        let a = assignment(LifecycleState::Invited, contacted_feb4());
        let e = email(
            "e1",
            EmailClass::Invitation,
            "editor@journal.example",
            &["m.daudin@univ.example"],
            5,
            &["M-1001"],
        );
        let out = reconciler().reconcile(&a, &[e]);
        let m = out.best_match.expect("verified match");
        assert!(m.verified);
        assert!((m.match_score - 1.0).abs() < 1e-9);
        assert_eq!(
            m.matched_fields,
            vec!["name".to_string(), "type".to_string(), "timestamp".to_string()]
        );
        assert_eq!(out.fill_email.as_deref(), Some("m.daudin@univ.example"));
    }

    #[test]
    fn below_threshold_is_omitted_not_an_error() {
        // Name nowhere, timestamp far from any date: only type aligns (0.3).
        let a = assignment(LifecycleState::Invited, StateDates::default());
        let mut e = email(
            "e1",
            EmailClass::Invitation,
            "editor@journal.example",
            &["someone@univ.example"],
            20,
            &["M-1001"],
        );
        e.subject = "manuscript M-1001".to_string();
        let out = reconciler().reconcile(&a, &[e]);
        assert!(out.best_match.is_none());
        assert!(out.fill_email.is_none());
    }

    #[test]
    fn known_email_is_never_overwritten_disagreement_is_flagged() {
        let mut a = assignment(LifecycleState::Invited, contacted_feb4());
        a.email = Some("daudin@other.example".to_string());
        let e = email(
            "e1",
            EmailClass::Invitation,
            "editor@journal.example",
            &["m.daudin@univ.example"],
            5,
            &["M-1001"],
        );
        let out = reconciler().reconcile(&a, &[e]);
        let m = out.best_match.expect("match");
        assert!(out.fill_email.is_none());
        assert!(m.disagreement.as_deref().unwrap().contains("daudin@other.example"));
    }

    #[test]
    fn reminder_count_requires_manuscript_link_and_name() {
        let a = assignment(
            LifecycleState::Overdue,
            StateDates {
                due: NaiveDate::from_ymd_opt(2025, 2, 10),
                ..Default::default()
            },
        );
        let mine1 = email(
            "r1",
            EmailClass::Reminder,
            "editor@journal.example",
            &["m.daudin@univ.example"],
            12,
            &["M-1001"],
        );
        let mine2 = email(
            "r2",
            EmailClass::Reminder,
            "editor@journal.example",
            &["m.daudin@univ.example"],
            19,
            &["M-1001"],
        );
        let other_referee = email(
            "r3",
            EmailClass::Reminder,
            "editor@journal.example",
            &["ferrari@unibo.example"],
            19,
            &["M-1001"],
        );
        let other_manuscript = email(
            "r4",
            EmailClass::Reminder,
            "editor@journal.example",
            &["m.daudin@univ.example"],
            19,
            &["M-7"],
        );
        let mut other_referee = other_referee;
        other_referee.subject = "manuscript M-1001".to_string();
        let out =
            reconciler().reconcile(&a, &[mine1, mine2, other_referee, other_manuscript]);
        assert_eq!(out.reminder_count, 2);
    }

    #[test]
    fn repeated_reminder_record_counts_once() {
        let a = assignment(
            LifecycleState::Overdue,
            StateDates {
                due: NaiveDate::from_ymd_opt(2025, 2, 10),
                ..Default::default()
            },
        );
        let reminder = email(
            "r1",
            EmailClass::Reminder,
            "editor@journal.example",
            &["m.daudin@univ.example"],
            12,
            &["M-1001"],
        );
        let out = reconciler().reconcile(&a, &[reminder.clone(), reminder]);
        assert_eq!(out.reminder_count, 1);
    }

    #[test]
    fn submission_class_only_aligns_with_submitted_report() {
        assert!(class_aligns(EmailClass::Submission, LifecycleState::ReportSubmitted));
        assert!(!class_aligns(EmailClass::Submission, LifecycleState::AcceptedPending));
        assert!(!class_aligns(EmailClass::Other, LifecycleState::ReportSubmitted));
        assert!(!class_aligns(EmailClass::Invitation, LifecycleState::Unknown));
    }

    #[test]
    fn responder_address_is_taken_from_sender() {
        let a = assignment(
            LifecycleState::Declined,
            StateDates {
                contacted: NaiveDate::from_ymd_opt(2025, 2, 4),
                responded: NaiveDate::from_ymd_opt(2025, 2, 8),
                ..Default::default()
            },
        );
        let e = email(
            "e1",
            EmailClass::Response,
            "m.daudin@univ.example",
            &["editor@journal.example"],
            8,
            &["M-1001"],
        );
        let out = reconciler().reconcile(&a, &[e]);
        assert_eq!(out.fill_email.as_deref(), Some("m.daudin@univ.example"));
    }
}
