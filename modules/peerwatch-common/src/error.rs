use thiserror::Error;

/// Failures scoped to a single entity. Nothing here aborts a run: the
/// pipeline catches per-entity errors into the run report and continues
/// with sibling manuscripts.
///
/// Parse ambiguity and merge conflicts are deliberately not error variants —
/// an unparseable fragment becomes an `Unknown` classification that is
/// retained, and a non-orderable state disagreement becomes a
/// `StateConflict` on the record itself.
#[derive(Error, Debug)]
pub enum PeerwatchError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Concurrency conflict on {entity_id}: stored fingerprint changed twice during write")]
    ConcurrencyConflict { entity_id: String },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
