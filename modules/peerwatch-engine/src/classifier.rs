//! Referee status classifier — turns one raw fragment into a partial
//! assignment, given the page section it was found in.
//!
//! Fragments follow a loose grammar `Name [#N] (KEY: VALUE)*` where the key
//! vocabulary and the meaning of absence are section-dependent. The two
//! section grammars are independent functions so each can be tested on its
//! own. A fragment that matches neither grammar is classified `Unknown` and
//! retained — never silently dropped.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

use peerwatch_common::config::UnlabeledPolicy;
use peerwatch_common::types::{LifecycleState, RawFragment, SectionLabel, StateDates};

static KEY_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([^:()]+):\s*([^()]*)\)").unwrap());
static ORDINAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\d+)\s*$").unwrap());

/// Classifier output: whatever one fragment revealed about one invitation.
/// Names are as written on the page; identity normalization happens in the
/// resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialAssignment {
    pub display_name: String,
    /// `#N` as written in the fragment. Absent ordinals are assigned by the
    /// resolver from date-set clustering.
    pub explicit_ordinal: Option<u32>,
    pub lifecycle_state: LifecycleState,
    pub state_dates: StateDates,
    pub email: Option<String>,
    pub source_section: SectionLabel,
    /// False when the fragment matched no grammar variant. Such fragments
    /// still flow through so an auditor can see unparsed input.
    pub parsed: bool,
}

/// Classify one fragment. Pure function of (fragment, section, today);
/// `today` exists only for the overdue comparison.
pub fn classify(
    fragment: &RawFragment,
    policy: UnlabeledPolicy,
    today: NaiveDate,
) -> PartialAssignment {
    let (name, ordinal, keys) = split_fragment(&fragment.text);

    if name.is_empty() {
        debug!(text = %fragment.text, section = %fragment.section_label, "unparseable fragment");
        return PartialAssignment {
            display_name: fragment.text.trim().to_string(),
            explicit_ordinal: None,
            lifecycle_state: LifecycleState::Unknown,
            state_dates: StateDates::default(),
            email: None,
            source_section: fragment.section_label,
            parsed: false,
        };
    }

    let mut dates = StateDates::default();
    let mut explicit_status = None;
    let mut email = None;

    for (key, value) in &keys {
        match key.as_str() {
            "status" | "outcome" => explicit_status = status_from_value(value),
            "lastcontactdate" | "contactdate" | "contacted" | "invited" | "invitationdate"
            | "lastcontact" => dates.contacted = parse_date(value),
            "responded" | "responsedate" | "agreeddate" | "accepteddate" => {
                dates.responded = parse_date(value)
            }
            "due" | "duedate" | "reportdue" => dates.due = parse_date(value),
            "rcvd" | "received" | "reportreceived" | "completed" | "submitted" => {
                dates.completed = parse_date(value)
            }
            "email" | "emailaddress" => {
                let v = value.trim();
                if !v.is_empty() {
                    email = Some(v.to_string());
                }
            }
            other => debug!(key = other, "unrecognized fragment key"),
        }
    }

    let lifecycle_state = match fragment.section_label {
        SectionLabel::DeclinedPool => classify_declined_pool(explicit_status, &dates, policy),
        SectionLabel::ActivePool => classify_active_pool(explicit_status, &dates, today),
    };

    PartialAssignment {
        display_name: name,
        explicit_ordinal: ordinal,
        lifecycle_state,
        state_dates: dates,
        email,
        source_section: fragment.section_label,
        parsed: true,
    }
}

/// Declined/no-response section grammar. An explicit status key always wins.
/// With no status key: a contact date and no due date means the invitation
/// went out and died, so `Declined`; no contact date at all falls to the
/// configured [`UnlabeledPolicy`].
fn classify_declined_pool(
    explicit: Option<LifecycleState>,
    dates: &StateDates,
    policy: UnlabeledPolicy,
) -> LifecycleState {
    if let Some(state) = explicit {
        return state;
    }
    if dates.contacted.is_some() && dates.due.is_none() {
        return LifecycleState::Declined;
    }
    match policy {
        UnlabeledPolicy::Invited => LifecycleState::Invited,
        UnlabeledPolicy::Unknown => LifecycleState::Unknown,
    }
}

/// Active section grammar. A received date means the report is in. A due
/// date alone means accepted-and-working, flipping to `Overdue` once the due
/// date passes. Anything else needs an explicit status key to mean more
/// than `Unknown`.
fn classify_active_pool(
    explicit: Option<LifecycleState>,
    dates: &StateDates,
    today: NaiveDate,
) -> LifecycleState {
    if dates.completed.is_some() {
        return LifecycleState::ReportSubmitted;
    }
    if let Some(due) = dates.due {
        return if due < today {
            LifecycleState::Overdue
        } else {
            LifecycleState::AcceptedPending
        };
    }
    explicit.unwrap_or(LifecycleState::Unknown)
}

/// Split `Name [#N] (KEY: VALUE)*` into its parts. The name is everything
/// before the first parenthesized key, with a trailing `#N` peeled off.
fn split_fragment(text: &str) -> (String, Option<u32>, Vec<(String, String)>) {
    let head = match text.find('(') {
        Some(i) => &text[..i],
        None => text,
    };

    let mut name = head.trim().to_string();
    let mut ordinal = None;
    if let Some(caps) = ORDINAL_RE.captures(&name) {
        ordinal = caps[1].parse().ok();
        let cut = caps.get(0).unwrap().start();
        name.truncate(cut);
        name = name.trim_end().to_string();
    }

    let keys = KEY_VALUE_RE
        .captures_iter(text)
        .map(|c| (normalize_key(&c[1]), c[2].trim().to_string()))
        .collect();

    (name, ordinal, keys)
}

/// Keys are matched case- and space-insensitively: "Last Contact Date",
/// "last-contact-date" and "LastContactDate" all mean the same thing.
fn normalize_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(|c| c.to_lowercase())
        .collect::<String>()
        .trim_matches('-')
        .replace('-', "")
}

fn status_from_value(value: &str) -> Option<LifecycleState> {
    match value.trim().to_lowercase().as_str() {
        "declined" | "refused" | "unavailable" => Some(LifecycleState::Declined),
        "invited" | "pending" | "no response" | "no reply" | "awaiting response" => {
            Some(LifecycleState::Invited)
        }
        "agreed" | "accepted" | "in progress" | "reviewing" => {
            Some(LifecycleState::AcceptedPending)
        }
        "received" | "complete" | "completed" | "submitted" | "report submitted" => {
            Some(LifecycleState::ReportSubmitted)
        }
        "overdue" | "late" => Some(LifecycleState::Overdue),
        "" => None,
        _ => Some(LifecycleState::Unknown),
    }
}

/// Platforms render dates half a dozen ways. Month-first is assumed for
/// slash dates, which matches the platforms this was built against.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let v = value.trim();
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%d %b %Y", "%b %d, %Y", "%d-%b-%Y", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(v, fmt) {
            return Some(d);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fragment(text: &str, section: SectionLabel) -> RawFragment {
        RawFragment {
            source_entity_id: "M-1001".to_string(),
            journal_code: "JPC".to_string(),
            section_label: section,
            text: text.to_string(),
            link_target: None,
            extracted_at: Utc::now(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn classify_default(text: &str, section: SectionLabel) -> PartialAssignment {
        classify(&fragment(text, section), UnlabeledPolicy::Invited, today())
    }

    #[test]
    fn declined_with_explicit_status_and_contact_date() {
        let p = classify_default(
            "Daudin #1 (Last Contact Date: 2025-02-04) (Status: Declined)",
            SectionLabel::DeclinedPool,
        );
        assert_eq!(p.display_name, "Daudin");
        assert_eq!(p.explicit_ordinal, Some(1));
        assert_eq!(p.lifecycle_state, LifecycleState::Declined);
        assert_eq!(p.state_dates.contacted, NaiveDate::from_ymd_opt(2025, 2, 4));
        assert!(p.parsed);
    }

    #[test]
    fn received_key_means_report_submitted() {
        let p = classify_default("Ferrari #1 (Rcvd: 2025-06-02)", SectionLabel::ActivePool);
        assert_eq!(p.lifecycle_state, LifecycleState::ReportSubmitted);
        assert_eq!(p.state_dates.completed, NaiveDate::from_ymd_opt(2025, 6, 2));
    }

    #[test]
    fn past_due_date_means_overdue() {
        let p = classify_default("Li #2 (Due: 2025-04-17)", SectionLabel::ActivePool);
        assert_eq!(p.explicit_ordinal, Some(2));
        assert_eq!(p.lifecycle_state, LifecycleState::Overdue);
        assert_eq!(p.state_dates.due, NaiveDate::from_ymd_opt(2025, 4, 17));
    }

    #[test]
    fn future_due_date_means_accepted_pending() {
        let p = classify_default("Li (Due: 2025-08-17)", SectionLabel::ActivePool);
        assert_eq!(p.lifecycle_state, LifecycleState::AcceptedPending);
    }

    #[test]
    fn contact_date_without_due_defaults_to_declined() {
        let p = classify_default(
            "Okafor (Last Contact: 2025-03-11)",
            SectionLabel::DeclinedPool,
        );
        assert_eq!(p.lifecycle_state, LifecycleState::Declined);
    }

    #[test]
    fn bare_name_follows_unlabeled_policy() {
        let p = classify_default("Okafor", SectionLabel::DeclinedPool);
        assert_eq!(p.lifecycle_state, LifecycleState::Invited);

        let p = classify(
            &fragment("Okafor", SectionLabel::DeclinedPool),
            UnlabeledPolicy::Unknown,
            today(),
        );
        assert_eq!(p.lifecycle_state, LifecycleState::Unknown);
    }

    #[test]
    fn explicit_status_overrides_contact_date_default() {
        let p = classify_default(
            "Okafor (Last Contact: 2025-03-11) (Status: Agreed)",
            SectionLabel::DeclinedPool,
        );
        assert_eq!(p.lifecycle_state, LifecycleState::AcceptedPending);
    }

    #[test]
    fn unparseable_fragment_is_retained_as_unknown() {
        let p = classify_default("(???)", SectionLabel::ActivePool);
        assert_eq!(p.lifecycle_state, LifecycleState::Unknown);
        assert!(!p.parsed);
        assert_eq!(p.display_name, "(???)");
    }

    #[test]
    fn received_beats_due_in_active_pool() {
        let p = classify_default(
            "Ferrari (Due: 2025-04-01) (Rcvd: 2025-05-20)",
            SectionLabel::ActivePool,
        );
        assert_eq!(p.lifecycle_state, LifecycleState::ReportSubmitted);
        assert_eq!(p.state_dates.due, NaiveDate::from_ymd_opt(2025, 4, 1));
    }

    #[test]
    fn inline_email_key_is_captured() {
        let p = classify_default(
            "Ferrari (Email: g.ferrari@unibo.example) (Due: 2025-08-01)",
            SectionLabel::ActivePool,
        );
        assert_eq!(p.email.as_deref(), Some("g.ferrari@unibo.example"));
    }

    #[test]
    fn key_matching_tolerates_case_and_spacing() {
        let p = classify_default(
            "Daudin (LAST CONTACT DATE : 2025-02-04)",
            SectionLabel::DeclinedPool,
        );
        assert_eq!(p.state_dates.contacted, NaiveDate::from_ymd_opt(2025, 2, 4));
    }

    #[test]
    fn date_formats() {
        assert_eq!(parse_date("2025-02-04"), NaiveDate::from_ymd_opt(2025, 2, 4));
        assert_eq!(parse_date("02/04/2025"), NaiveDate::from_ymd_opt(2025, 2, 4));
        assert_eq!(parse_date("4 Feb 2025"), NaiveDate::from_ymd_opt(2025, 2, 4));
        assert_eq!(parse_date("Feb 4, 2025"), NaiveDate::from_ymd_opt(2025, 2, 4));
        assert_eq!(parse_date("04-Feb-2025"), NaiveDate::from_ymd_opt(2025, 2, 4));
        assert_eq!(parse_date("soon"), None);
    }

    #[test]
    fn unknown_status_value_is_not_dropped() {
        let p = classify_default(
            "Daudin (Status: Withdrawn by editor)",
            SectionLabel::DeclinedPool,
        );
        assert_eq!(p.lifecycle_state, LifecycleState::Unknown);
        assert!(p.parsed);
    }
}
