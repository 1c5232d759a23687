use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Section vocabulary ---

/// Which enumeration of a platform page a fragment was found in. The
/// vocabulary is small and fixed; collectors map their site-specific
/// section headings onto it before handing fragments over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionLabel {
    DeclinedPool,
    ActivePool,
}

impl std::fmt::Display for SectionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SectionLabel::DeclinedPool => write!(f, "declined_pool"),
            SectionLabel::ActivePool => write!(f, "active_pool"),
        }
    }
}

impl SectionLabel {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "declined_pool" | "declined" | "no_response" => Some(Self::DeclinedPool),
            "active_pool" | "active" | "in_progress" => Some(Self::ActivePool),
            _ => None,
        }
    }
}

// --- Raw input ---

/// One text/link fragment pulled off a source page by an external collector.
/// Ephemeral: produced once, consumed once by the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFragment {
    pub source_entity_id: String,
    pub journal_code: String,
    pub section_label: SectionLabel,
    pub text: String,
    pub link_target: Option<String>,
    pub extracted_at: DateTime<Utc>,
}

/// One collector pass over one manuscript page: the manuscript-level fields
/// as parsed (possibly empty — parsing may have partially failed upstream)
/// plus every referee fragment found on the page. This is the pipeline's
/// unit of work; observations for different manuscripts are independent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManuscriptObservation {
    pub manuscript_id: String,
    pub journal_code: String,
    pub title: String,
    pub authors: Vec<String>,
    pub status: String,
    pub submission_date: Option<NaiveDate>,
    pub editor_names: Vec<String>,
    pub fragments: Vec<RawFragment>,
}

impl ManuscriptObservation {
    pub fn key(&self) -> ManuscriptKey {
        ManuscriptKey {
            id: self.manuscript_id.clone(),
            journal_code: self.journal_code.clone(),
        }
    }
}

// --- Lifecycle state machine ---

/// Referee lifecycle state inferred from page fragments. `Declined` and
/// `ReportSubmitted` are terminal; `AcceptedPending` and `Overdue` flip
/// between each other on time alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unknown,
    Invited,
    Declined,
    AcceptedPending,
    Overdue,
    ReportSubmitted,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Unknown => write!(f, "unknown"),
            LifecycleState::Invited => write!(f, "invited"),
            LifecycleState::Declined => write!(f, "declined"),
            LifecycleState::AcceptedPending => write!(f, "accepted_pending"),
            LifecycleState::Overdue => write!(f, "overdue"),
            LifecycleState::ReportSubmitted => write!(f, "report_submitted"),
        }
    }
}

impl LifecycleState {
    /// Precedence rank used during merge: higher rank wins. `Declined` and
    /// `AcceptedPending` share a rank because they sit on incomparable
    /// branches — see [`LifecycleState::conflicts_with`].
    pub fn precedence(&self) -> u8 {
        match self {
            LifecycleState::Unknown => 0,
            LifecycleState::Invited => 1,
            LifecycleState::Declined => 2,
            LifecycleState::AcceptedPending => 2,
            LifecycleState::Overdue => 3,
            LifecycleState::ReportSubmitted => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Declined | LifecycleState::ReportSubmitted)
    }

    /// True when two observed states sit on incomparable branches of the
    /// lifecycle: a referee cannot have both declined and be working on a
    /// report for the same invitation. The resolver never guesses between
    /// them; it records a [`StateConflict`].
    pub fn conflicts_with(&self, other: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, other),
            (Declined, AcceptedPending)
                | (Declined, Overdue)
                | (AcceptedPending, Declined)
                | (Overdue, Declined)
        )
    }
}

/// Two concurrently valid observations disagreed on incomparable states.
/// Both candidates are retained for manual resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConflict {
    pub left: LifecycleState,
    pub right: LifecycleState,
    pub detected_at: DateTime<Utc>,
}

// --- Dates ---

/// Dates attached to a referee assignment as observed on the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDates {
    pub contacted: Option<NaiveDate>,
    pub responded: Option<NaiveDate>,
    pub due: Option<NaiveDate>,
    pub completed: Option<NaiveDate>,
}

impl StateDates {
    pub fn is_empty(&self) -> bool {
        self.contacted.is_none()
            && self.responded.is_none()
            && self.due.is_none()
            && self.completed.is_none()
    }

    /// Canonical rendition of the date set, used to cluster fragments into
    /// distinct invitations of the same referee.
    pub fn signature(&self) -> String {
        fn part(d: Option<NaiveDate>) -> String {
            d.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
        }
        format!(
            "c:{}|r:{}|d:{}|f:{}",
            part(self.contacted),
            part(self.responded),
            part(self.due),
            part(self.completed)
        )
    }

    /// Whether two date sets can describe the same invitation: every field
    /// present in both must agree. A subset/superset relationship is a later,
    /// fuller view of the same invitation, not a re-invitation.
    pub fn compatible_with(&self, other: &StateDates) -> bool {
        fn ok(a: Option<NaiveDate>, b: Option<NaiveDate>) -> bool {
            match (a, b) {
                (Some(x), Some(y)) => x == y,
                _ => true,
            }
        }
        ok(self.contacted, other.contacted)
            && ok(self.responded, other.responded)
            && ok(self.due, other.due)
            && ok(self.completed, other.completed)
    }

    /// Field-wise merge. Absent fields fill in; when both sides carry a
    /// value, contacted/responded keep the earlier date and due/completed
    /// keep the later one.
    pub fn merge(&mut self, other: &StateDates) {
        fn earlier(a: &mut Option<NaiveDate>, b: Option<NaiveDate>) {
            *a = match (*a, b) {
                (Some(x), Some(y)) => Some(x.min(y)),
                (x, y) => x.or(y),
            };
        }
        fn later(a: &mut Option<NaiveDate>, b: Option<NaiveDate>) {
            *a = match (*a, b) {
                (Some(x), Some(y)) => Some(x.max(y)),
                (x, y) => x.or(y),
            };
        }
        earlier(&mut self.contacted, other.contacted);
        earlier(&mut self.responded, other.responded);
        later(&mut self.due, other.due);
        later(&mut self.completed, other.completed);
    }
}

// --- Identity keys ---

/// Global manuscript identity: platform-scoped id plus journal code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManuscriptKey {
    pub id: String,
    pub journal_code: String,
}

impl ManuscriptKey {
    /// Stable entity id used by the fingerprint store and change log.
    pub fn entity_id(&self) -> String {
        format!("{}:{}", self.journal_code, self.id)
    }
}

impl std::fmt::Display for ManuscriptKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.journal_code, self.id)
    }
}

/// Referee assignment identity: one invitation of one person to review one
/// manuscript. The ordinal is part of identity, not display — the same name
/// re-invited after declining is a distinct assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentKey {
    pub manuscript: ManuscriptKey,
    /// Normalized referee name (see `names::normalize_name`).
    pub referee: String,
    pub ordinal: u32,
}

impl AssignmentKey {
    pub fn entity_id(&self) -> String {
        format!("{}:{}#{}", self.manuscript.entity_id(), self.referee, self.ordinal)
    }
}

impl std::fmt::Display for AssignmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}#{}", self.manuscript, self.referee, self.ordinal)
    }
}

// --- Canonical entities ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manuscript {
    pub key: ManuscriptKey,
    pub title: String,
    pub authors: Vec<String>,
    pub status: String,
    pub submission_date: Option<NaiveDate>,
    pub editor_names: Vec<String>,
    pub referee_assignment_ids: Vec<AssignmentKey>,
    pub last_seen_fingerprint: Option<String>,
    pub last_updated_at: DateTime<Utc>,
    /// Set by the caller when the manuscript disappears from every source
    /// enumeration. Manuscripts are never deleted.
    pub stale: bool,
}

impl Manuscript {
    pub fn new(key: ManuscriptKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            title: String::new(),
            authors: Vec::new(),
            status: String::new(),
            submission_date: None,
            editor_names: Vec::new(),
            referee_assignment_ids: Vec::new(),
            last_seen_fingerprint: None,
            last_updated_at: now,
            stale: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefereeAssignment {
    pub key: AssignmentKey,
    /// Name as written on the page, preserved for display.
    pub display_name: String,
    pub email: Option<String>,
    pub institution: Option<String>,
    pub lifecycle_state: LifecycleState,
    pub state_dates: StateDates,
    pub source_section: SectionLabel,
    /// Present when two observations disagreed on incomparable states.
    pub conflict: Option<StateConflict>,
    /// Distinct reminder emails linked to this assignment. Informational.
    pub reminder_count: u32,
    pub last_updated_at: DateTime<Utc>,
}

// --- Change log ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Manuscript,
    Assignment,
    Document,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Manuscript => write!(f, "manuscript"),
            EntityKind::Assignment => write!(f, "assignment"),
            EntityKind::Document => write!(f, "document"),
        }
    }
}

/// Append-only record of a detected content change. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: Uuid,
    pub entity_id: String,
    pub entity_kind: EntityKind,
    pub previous_fingerprint: Option<String>,
    pub new_fingerprint: String,
    pub detected_at: DateTime<Utc>,
    pub change_summary: String,
}

// --- Email reconciliation ---

/// Classification supplied by the email search collaborator. Taken as given;
/// this core does no natural-language classification of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailClass {
    Invitation,
    Reminder,
    Response,
    Submission,
    Other,
}

impl EmailClass {
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "invitation" | "invite" => Self::Invitation,
            "reminder" => Self::Reminder,
            "response" | "reply" => Self::Response,
            "submission" | "report" => Self::Submission,
            _ => Self::Other,
        }
    }
}

/// Email-record summary handed in by the external search collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub classified_type: EmailClass,
    pub referenced_manuscript_ids: Vec<String>,
}

/// Advisory overlay linking an assignment to a candidate email. Never
/// originates lifecycle state; at most fills a previously empty email
/// address or flags a disagreement for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMatch {
    pub id: Uuid,
    pub assignment_id: String,
    pub candidate_email_id: String,
    pub match_score: f64,
    pub matched_fields: Vec<String>,
    pub verified: bool,
    /// Set when the matched email carries an address that contradicts an
    /// already-known one. Recorded, never auto-resolved.
    pub disagreement: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_submitted_outranks_everything() {
        let all = [
            LifecycleState::Unknown,
            LifecycleState::Invited,
            LifecycleState::Declined,
            LifecycleState::AcceptedPending,
            LifecycleState::Overdue,
        ];
        for s in all {
            assert!(LifecycleState::ReportSubmitted.precedence() > s.precedence());
        }
    }

    #[test]
    fn declined_and_accepted_pending_are_incomparable() {
        assert!(LifecycleState::Declined.conflicts_with(LifecycleState::AcceptedPending));
        assert!(LifecycleState::AcceptedPending.conflicts_with(LifecycleState::Declined));
        assert!(LifecycleState::Declined.conflicts_with(LifecycleState::Overdue));
        assert!(!LifecycleState::Declined.conflicts_with(LifecycleState::Invited));
        assert!(!LifecycleState::Declined.conflicts_with(LifecycleState::ReportSubmitted));
    }

    #[test]
    fn terminal_states() {
        assert!(LifecycleState::Declined.is_terminal());
        assert!(LifecycleState::ReportSubmitted.is_terminal());
        assert!(!LifecycleState::Overdue.is_terminal());
        assert!(!LifecycleState::AcceptedPending.is_terminal());
    }

    #[test]
    fn date_signature_distinguishes_invitations() {
        let first = StateDates {
            contacted: NaiveDate::from_ymd_opt(2025, 1, 10),
            ..Default::default()
        };
        let second = StateDates {
            contacted: NaiveDate::from_ymd_opt(2025, 3, 2),
            ..Default::default()
        };
        assert_ne!(first.signature(), second.signature());
        assert!(!first.compatible_with(&second));
    }

    #[test]
    fn superset_dates_are_the_same_invitation() {
        let early = StateDates {
            contacted: NaiveDate::from_ymd_opt(2025, 1, 10),
            ..Default::default()
        };
        let fuller = StateDates {
            contacted: NaiveDate::from_ymd_opt(2025, 1, 10),
            due: NaiveDate::from_ymd_opt(2025, 2, 28),
            ..Default::default()
        };
        assert!(early.compatible_with(&fuller));

        let mut merged = early;
        merged.merge(&fuller);
        assert_eq!(merged.due, NaiveDate::from_ymd_opt(2025, 2, 28));
        assert_eq!(merged.contacted, NaiveDate::from_ymd_opt(2025, 1, 10));
    }

    #[test]
    fn section_label_parses_loosely() {
        assert_eq!(
            SectionLabel::from_str_loose("Declined"),
            Some(SectionLabel::DeclinedPool)
        );
        assert_eq!(
            SectionLabel::from_str_loose("active_pool"),
            Some(SectionLabel::ActivePool)
        );
        assert_eq!(SectionLabel::from_str_loose("garbage"), None);
    }

    #[test]
    fn assignment_entity_id_includes_ordinal() {
        let key = AssignmentKey {
            manuscript: ManuscriptKey {
                id: "M-1001".into(),
                journal_code: "JPC".into(),
            },
            referee: "daudin".into(),
            ordinal: 2,
        };
        assert_eq!(key.entity_id(), "JPC:M-1001:daudin#2");
    }
}
