//! Transformation Passes
//!
//! The fixed, ordered rewrite passes applied to a workflow tree before it
//! is handed to a code generator:
//! - [`reconcile`]: Secondary-file datatype unification across connections
//! - [`prune`]: Removal of tool inputs/outputs nothing reads
//! - [`rename`]: Dialect-legal identifiers with reference repair
//! - [`pipeline`]: Runs the passes in order, with optional safe mode

pub mod pipeline;
pub mod prune;
pub mod reconcile;
pub mod rename;

pub use pipeline::{translate, PassFailure, PipelineReport, Translator};
pub use prune::{prune, PruneReport};
pub use reconcile::{reconcile, ReconcileReport, MAX_ITERATIONS};
pub use rename::{rename, RenameTable, Renamed};
