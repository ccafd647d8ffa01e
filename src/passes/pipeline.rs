//! Translation Pipeline
//!
//! Drives one workflow tree through the fixed pass order:
//! 1. Structural validation
//! 2. Secondary-file reconciliation
//! 3. Tool interface pruning (skipped when simplification is off)
//! 4. Identifier renaming for the destination dialect
//! 5. Topological ordering of the root scope's steps
//!
//! In safe mode a reconciliation or pruning failure is logged, that pass's
//! changes are rolled back, and the run carries on. Cycles, bad input and
//! renaming failures always abort.

use std::fmt;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::config::{Dialect, SimplificationMode, SubtypeDivergence, TranslationConfig};
use crate::error::Result;
use crate::workflow::{topological_order, validate_workflow, NodeId, Workflow};

use super::prune::{prune, PruneReport};
use super::reconcile::{reconcile, ReconcileReport};
use super::rename::{rename, RenameTable};

/// A pass that failed in safe mode and was rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassFailure {
    pub pass: &'static str,
    pub message: String,
}

/// What one translation run did.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub reconcile: Option<ReconcileReport>,
    pub prune: Option<PruneReport>,
    pub renames: Option<RenameTable>,
    /// Passes rolled back under safe mode
    pub failures: Vec<PassFailure>,
    /// Root-scope steps in call order, after renaming
    pub step_order: Vec<NodeId>,
    pub elapsed: Duration,
}

impl PipelineReport {
    /// True if no pass had to be rolled back.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Human-readable summary of the run.
    pub fn get_summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Translation Summary:")?;
        match &self.reconcile {
            Some(report) => writeln!(
                f,
                "  Reconciliation: {} rounds, {} types updated, {} groups preserved",
                report.iterations, report.slots_updated, report.groups_preserved
            )?,
            None => writeln!(f, "  Reconciliation: rolled back")?,
        }
        match &self.prune {
            Some(report) => writeln!(
                f,
                "  Pruning: {} tools, {} inputs / {} outputs / {} arguments removed, {} defaults migrated",
                report.tools_examined,
                report.inputs_removed,
                report.outputs_removed,
                report.arguments_removed,
                report.defaults_migrated
            )?,
            None => writeln!(f, "  Pruning: skipped")?,
        }
        if let Some(table) = &self.renames {
            writeln!(f, "  Renaming: {} of {} ids changed", table.changed().count(), table.len())?;
        }
        writeln!(f, "  Steps: {}", self.step_order.len())?;
        for failure in &self.failures {
            writeln!(f, "  Rolled back {}: {}", failure.pass, failure.message)?;
        }
        write!(f, "  Time: {:.2?}", self.elapsed)
    }
}

/// Runs the pass pipeline over a workflow tree.
///
/// # Example
///
/// ```rust,no_run
/// use wfbridge::config::{Dialect, SimplificationMode};
/// use wfbridge::passes::Translator;
/// use wfbridge::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("pipeline.json")?;
///     let mut translator = Translator::new(workflow);
///     translator.set_dialect(Dialect::Wdl);
///     translator.set_simplification(SimplificationMode::On);
///
///     let report = translator.run()?;
///     println!("{}", report);
///     Ok(())
/// }
/// ```
pub struct Translator {
    workflow: Workflow,
    config: TranslationConfig,
}

impl Translator {
    /// Creates a translator with the default configuration.
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            config: TranslationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TranslationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn set_dialect(&mut self, dialect: Dialect) {
        self.config.dialect = dialect;
    }

    pub fn set_simplification(&mut self, mode: SimplificationMode) {
        self.config.simplification = mode;
    }

    /// Enables or disables rollback of failing passes.
    pub fn set_safe_mode(&mut self, enabled: bool) {
        self.config.safe_mode = enabled;
    }

    pub fn set_subtype_divergence(&mut self, policy: SubtypeDivergence) {
        self.config.subtype_divergence = policy;
    }

    pub fn config(&self) -> &TranslationConfig {
        &self.config
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn into_workflow(self) -> Workflow {
        self.workflow
    }

    /// Runs every pass in order.
    ///
    /// # Returns
    ///
    /// * `Ok(report)` - The tree is translated (possibly with rolled-back
    ///   passes listed in `report.failures`)
    /// * `Err` - A fatal error; the tree may be partially rewritten
    pub fn run(&mut self) -> Result<PipelineReport> {
        translate(&mut self.workflow, &self.config)
    }
}

/// Translates `workflow` in place with `config`.
pub fn translate(workflow: &mut Workflow, config: &TranslationConfig) -> Result<PipelineReport> {
    let start_time = Instant::now();
    let mut report = PipelineReport::default();

    info!(
        "Translating '{}' to {} (simplification: {}, safe mode: {})",
        workflow.id, config.dialect, config.simplification, config.safe_mode
    );

    validate_workflow(workflow)?;

    let policy = config.subtype_divergence;
    report.reconcile = guarded(workflow, config.safe_mode, "reconciliation", &mut report.failures, |wf| {
        reconcile(wf, policy)
    })?;

    if config.simplification != SimplificationMode::Off {
        let mode = config.simplification;
        report.prune = guarded(workflow, config.safe_mode, "pruning", &mut report.failures, |wf| {
            prune(wf, mode)
        })?;
    }

    report.renames = Some(rename(workflow, config.dialect)?);

    validate_workflow(workflow)?;
    report.step_order = topological_order(workflow)?;
    report.elapsed = start_time.elapsed();

    if report.is_clean() {
        info!("Translation completed in {:.2?}", report.elapsed);
    } else {
        warn!(
            "Translation completed with {} rolled-back pass(es)",
            report.failures.len()
        );
    }
    Ok(report)
}

/// Runs one pass on the tree. In safe mode a recoverable error restores
/// the tree to its state before the pass and is recorded instead.
fn guarded<T>(
    workflow: &mut Workflow,
    safe_mode: bool,
    pass: &'static str,
    failures: &mut Vec<PassFailure>,
    run_pass: impl FnOnce(&mut Workflow) -> Result<T>,
) -> Result<Option<T>> {
    if !safe_mode {
        return run_pass(workflow).map(Some);
    }

    let snapshot = workflow.clone();
    match run_pass(workflow) {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_always_fatal() => Err(e),
        Err(e) => {
            error!("{} failed, rolling back: {}", pass, e);
            *workflow = snapshot;
            failures.push(PassFailure {
                pass,
                message: e.to_string(),
            });
            Ok(None)
        }
    }
}
