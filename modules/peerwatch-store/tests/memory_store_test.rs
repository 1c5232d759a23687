use chrono::Utc;
use uuid::Uuid;

use peerwatch_common::types::{
    AssignmentKey, ChangeRecord, EntityKind, LifecycleState, Manuscript, ManuscriptKey,
    RefereeAssignment, SectionLabel, StateDates,
};
use peerwatch_store::{CasOutcome, MemoryStore, RecordStore};

fn key(id: &str) -> ManuscriptKey {
    ManuscriptKey {
        id: id.to_string(),
        journal_code: "JPC".to_string(),
    }
}

fn assignment(m: &ManuscriptKey, referee: &str, ordinal: u32) -> RefereeAssignment {
    RefereeAssignment {
        key: AssignmentKey {
            manuscript: m.clone(),
            referee: referee.to_string(),
            ordinal,
        },
        display_name: referee.to_string(),
        email: None,
        institution: None,
        lifecycle_state: LifecycleState::Invited,
        state_dates: StateDates::default(),
        source_section: SectionLabel::DeclinedPool,
        conflict: None,
        reminder_count: 0,
        last_updated_at: Utc::now(),
    }
}

#[test]
fn manuscript_roundtrip() {
    let store = MemoryStore::new();
    let k = key("M-1");
    assert!(store.get_manuscript(&k).unwrap().is_none());

    let mut m = Manuscript::new(k.clone(), Utc::now());
    m.title = "On the habits of capuchins".to_string();
    store.put_manuscript(&m).unwrap();

    let got = store.get_manuscript(&k).unwrap().unwrap();
    assert_eq!(got.title, "On the habits of capuchins");
}

#[test]
fn assignments_listed_in_stable_order() {
    let store = MemoryStore::new();
    let k = key("M-2");
    store.put_assignment(&assignment(&k, "li", 2)).unwrap();
    store.put_assignment(&assignment(&k, "daudin", 1)).unwrap();
    store.put_assignment(&assignment(&k, "li", 1)).unwrap();
    store.put_assignment(&assignment(&key("M-other"), "li", 1)).unwrap();

    let listed = store.assignments_for_manuscript(&k).unwrap();
    let keys: Vec<(String, u32)> = listed
        .iter()
        .map(|a| (a.key.referee.clone(), a.key.ordinal))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("daudin".to_string(), 1),
            ("li".to_string(), 1),
            ("li".to_string(), 2)
        ]
    );
}

#[test]
fn cas_commits_from_empty_and_rejects_stale_writers() {
    let store = MemoryStore::new();

    assert_eq!(
        store
            .compare_and_set_fingerprint("JPC:M-3", EntityKind::Manuscript, None, "aaa")
            .unwrap(),
        CasOutcome::Committed
    );
    assert_eq!(store.fingerprint("JPC:M-3").unwrap().as_deref(), Some("aaa"));

    // A writer that read the pre-"aaa" state must not clobber it.
    assert_eq!(
        store
            .compare_and_set_fingerprint("JPC:M-3", EntityKind::Manuscript, None, "bbb")
            .unwrap(),
        CasOutcome::Stale
    );
    assert_eq!(store.fingerprint("JPC:M-3").unwrap().as_deref(), Some("aaa"));

    // Correct expectation wins.
    assert_eq!(
        store
            .compare_and_set_fingerprint("JPC:M-3", EntityKind::Manuscript, Some("aaa"), "bbb")
            .unwrap(),
        CasOutcome::Committed
    );
}

#[test]
fn cas_identical_value_is_idempotent() {
    let store = MemoryStore::new();
    store
        .compare_and_set_fingerprint("doc:42", EntityKind::Document, None, "aaa")
        .unwrap();

    // Two runs computing the same fingerprint may both commit it.
    assert_eq!(
        store
            .compare_and_set_fingerprint("doc:42", EntityKind::Document, None, "aaa")
            .unwrap(),
        CasOutcome::Committed
    );
}

#[test]
fn change_log_is_append_only_and_ordered() {
    let store = MemoryStore::new();
    for i in 0..3 {
        store
            .append_change(&ChangeRecord {
                id: Uuid::new_v4(),
                entity_id: format!("JPC:M-{i}"),
                entity_kind: EntityKind::Manuscript,
                previous_fingerprint: None,
                new_fingerprint: format!("fp{i}"),
                detected_at: Utc::now(),
                change_summary: "first observation".to_string(),
            })
            .unwrap();
    }
    let changes = store.changes().unwrap();
    assert_eq!(changes.len(), 3);
    assert_eq!(changes[0].entity_id, "JPC:M-0");
    assert_eq!(changes[2].entity_id, "JPC:M-2");
}
