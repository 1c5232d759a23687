pub mod config;
pub mod error;
pub mod names;
pub mod types;

pub use config::{Config, UnlabeledPolicy};
pub use error::PeerwatchError;
pub use names::normalize_name;
pub use types::{
    AssignmentKey, ChangeRecord, EmailClass, EmailMatch, EmailRecord, EntityKind, LifecycleState,
    Manuscript, ManuscriptKey, ManuscriptObservation, RawFragment, RefereeAssignment,
    SectionLabel, StateConflict, StateDates,
};
