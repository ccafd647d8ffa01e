//! wfbridge - Workflow Translation Core
//!
//! Holds bioinformatics pipelines ingested from CWL, WDL or Galaxy in one
//! intermediate representation and prepares that tree for a CWL, WDL or
//! Nextflow code generator. Every rewrite keeps the tree acyclic, keeps
//! sibling ids unique and keeps every selector bound to a live node.
//!
//! # Architecture
//!
//! The library is organized into four modules:
//!
//! - [`workflow`]: The tree itself, expressions, connection analysis and loading
//! - [`passes`]: Reconciliation, pruning and renaming, plus the pipeline
//! - [`config`]: Dialect, simplification mode and safe mode settings
//! - [`error`]: The error taxonomy shared by every pass
//!
//! # Example
//!
//! ```rust,no_run
//! use wfbridge::config::{Dialect, SimplificationMode, TranslationConfig};
//! use wfbridge::{load_workflow, Translator};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load an ingested tree
//!     let workflow = load_workflow("ingested.json")?;
//!
//!     // Prepare it for WDL, dropping unused tool inputs
//!     let config = TranslationConfig::new(Dialect::Wdl)
//!         .with_simplification(SimplificationMode::On);
//!     let mut translator = Translator::new(workflow).with_config(config);
//!
//!     let report = translator.run()?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod passes;
pub mod workflow;

// Re-export commonly used types
pub use config::{Dialect, SimplificationMode, TranslationConfig};
pub use error::{Result, TranslateError};
pub use passes::{translate, PipelineReport, Translator};
pub use workflow::model::Workflow;
pub use workflow::parser::load_workflow;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "wfbridge";
