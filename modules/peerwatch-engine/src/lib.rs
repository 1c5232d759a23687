//! Extraction normalization and incremental change-detection engine.
//!
//! Takes raw page fragments produced by platform-specific collectors and
//! turns them into canonical, deduplicated, state-tracked manuscript and
//! referee records, skipping work for content that has not changed and
//! reconciling results against an independent email timeline.
//!
//! The engine is a synchronous, single-threaded pipeline per run: it never
//! touches the network or a browser, only already-fetched data. Manuscripts
//! are independent of each other, so callers may run pipelines in parallel
//! at manuscript granularity against any [`peerwatch_store::RecordStore`]
//! with per-key compare-and-set semantics.

pub mod cache;
pub mod classifier;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod resolver;
pub mod run_log;

pub use cache::{assignment_fingerprint, effective_state, manuscript_fingerprint, ChangeGate, Decision};
pub use classifier::{classify, PartialAssignment};
pub use pipeline::ExtractionPipeline;
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use report::RunReport;
pub use resolver::{merge_assignment, merge_manuscript_fields, resolve, MergeOutcome, Resolution};
pub use run_log::{EventKind, RunLog};
