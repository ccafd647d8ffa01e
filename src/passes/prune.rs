//! Liveness Pruning
//!
//! Removes tool inputs and outputs that cannot influence anything the
//! workflow produces. Decisions are made once per distinct command or code
//! tool, from the union of all its call sites, and applied to every copy.
//!
//! # Modes
//!
//! - `off`: nothing is touched
//! - `on`: usage-driven; an input survives if it is required, supplied by a
//!   connection or a computed value, supplied differently across call
//!   sites, read by a surviving argument, default or output selector, or
//!   carries a default of its own
//! - `aggressive`: static; only required or defaulted inputs survive
//!
//! In both active modes an output survives if it is required or consumed
//! downstream, and only surviving outputs keep their selectors' inputs
//! alive. A placeholder workflow input supplied at every call site has its
//! value moved onto the tool input's default (`on` mode only). Rounds
//! repeat until nothing more can be removed.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::{debug, info};
use serde_json::Value;

use crate::config::SimplificationMode;
use crate::error::{Result, TranslateError};
use crate::workflow::{
    Expression, Leaf, NodeId, Tool, ToolArgument, ToolInput, ToolOutput, Workflow,
};

/// Summary of one pruning run. Counts are per distinct tool, not per copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub tools_examined: usize,
    pub inputs_removed: usize,
    pub outputs_removed: usize,
    pub arguments_removed: usize,
    pub defaults_migrated: usize,
}

/// What a call site supplies for one tool input.
#[derive(Debug, Clone, PartialEq)]
enum SourceKind {
    /// A workflow input; `placeholder` holds its static value, if any
    WorkflowInput {
        optional: bool,
        placeholder: Option<Value>,
    },
    /// Another step's output
    Connection,
    Literal,
    /// Any computed expression
    Other,
}

#[derive(Debug, Clone)]
struct Supplied {
    key: String,
    kind: SourceKind,
}

/// Everything the call sites of one tool reveal about its interface.
#[derive(Debug, Default)]
struct ToolUsage {
    call_sites: usize,
    /// Tool input id -> one entry per call site supplying it
    supplied: HashMap<String, Vec<Supplied>>,
    /// Output ids read by some step or workflow output
    consumed: HashSet<String>,
    /// Input ids named in a scatter at some call site
    scattered: BTreeSet<String>,
}

/// The pruning decision for one tool.
#[derive(Debug, Default)]
struct ToolPlan {
    kept_inputs: HashSet<NodeId>,
    kept_outputs: HashSet<NodeId>,
    migrated: BTreeMap<NodeId, Value>,
}

/// Prunes dead tool inputs and outputs across the whole tree.
///
/// Removing an input can leave an upstream output unread, so rounds repeat
/// until one removes nothing. The result is stable under a second run.
pub fn prune(workflow: &mut Workflow, mode: SimplificationMode) -> Result<PruneReport> {
    let mut report = PruneReport::default();
    if mode == SimplificationMode::Off {
        debug!("Simplification is off, skipping pruning");
        return Ok(report);
    }

    info!("Pruning tool interfaces in '{}' (mode: {})", workflow.id, mode);

    let mut rounds = 0;
    loop {
        let round = prune_round(workflow, mode)?;
        rounds += 1;
        report.tools_examined = report.tools_examined.max(round.tools_examined);
        report.inputs_removed += round.inputs_removed;
        report.outputs_removed += round.outputs_removed;
        report.arguments_removed += round.arguments_removed;
        report.defaults_migrated += round.defaults_migrated;
        if !round.changed() {
            break;
        }
        debug!("Pruning round {} changed the tree, running again", rounds);
    }

    check_consistency(workflow)?;

    info!(
        "Pruning complete after {} rounds: {} tools, {} inputs and {} outputs removed",
        rounds, report.tools_examined, report.inputs_removed, report.outputs_removed
    );
    Ok(report)
}

impl PruneReport {
    fn changed(&self) -> bool {
        self.inputs_removed
            + self.outputs_removed
            + self.arguments_removed
            + self.defaults_migrated
            > 0
    }
}

/// Plans every tool from the current call sites and applies the plans.
fn prune_round(workflow: &mut Workflow, mode: SimplificationMode) -> Result<PruneReport> {
    let mut report = PruneReport::default();
    let (tools, usage) = collect_usage(workflow);

    // tool uuid -> (pruned tool, source keys to drop at every call site)
    let mut rewrites: BTreeMap<NodeId, (Tool, HashSet<String>)> = BTreeMap::new();

    for (uuid, tool) in &tools {
        let empty = ToolUsage::default();
        let tool_usage = usage.get(uuid).unwrap_or(&empty);
        let plan = plan_tool(tool, tool_usage, mode)?;
        report.tools_examined += 1;

        let (pruned, dropped, counts) = apply_plan(tool, &plan);
        report.inputs_removed += counts.inputs;
        report.outputs_removed += counts.outputs;
        report.arguments_removed += counts.arguments;
        report.defaults_migrated += plan.migrated.len();

        if counts.inputs + counts.outputs + counts.arguments > 0 || !plan.migrated.is_empty() {
            info!(
                "Tool '{}': removed {} inputs, {} outputs, {} arguments; migrated {} defaults",
                tool.id(),
                counts.inputs,
                counts.outputs,
                counts.arguments,
                plan.migrated.len()
            );
            rewrites.insert(*uuid, (pruned, dropped));
        }
    }

    workflow.for_each_scope_mut(&mut |scope| {
        for step in scope.steps.values_mut() {
            if let Some((pruned, dropped)) = rewrites.get(&step.tool.uuid()) {
                step.tool = pruned.clone();
                step.sources.retain(|port, _| !dropped.contains(port));
            }
        }
    });

    Ok(report)
}

/// The ports and arguments of a prunable tool.
fn interface(tool: &Tool) -> Option<(&[ToolInput], &[ToolOutput], &[ToolArgument])> {
    match tool {
        Tool::Command(tool) => Some((
            tool.inputs.as_slice(),
            tool.outputs.as_slice(),
            tool.arguments.as_slice(),
        )),
        Tool::Code(tool) => Some((tool.inputs.as_slice(), tool.outputs.as_slice(), &[][..])),
        Tool::Workflow(_) => None,
    }
}

/// Walks every call site in the tree. Returns one copy of each prunable
/// tool and what its call sites supply and consume.
fn collect_usage(workflow: &Workflow) -> (BTreeMap<NodeId, Tool>, HashMap<NodeId, ToolUsage>) {
    let mut tools: BTreeMap<NodeId, Tool> = BTreeMap::new();
    let mut usage: HashMap<NodeId, ToolUsage> = HashMap::new();

    for scope in workflow.scopes() {
        for step in scope.sorted_steps() {
            // consumption of other steps' outputs
            for expr in step.expressions() {
                mark_consumed(scope, expr, &mut usage);
            }

            if interface(&step.tool).is_none() {
                continue;
            }
            let uuid = step.tool.uuid();
            tools.entry(uuid).or_insert_with(|| step.tool.clone());

            let entry = usage.entry(uuid).or_default();
            entry.call_sites += 1;
            if let Some(scatter) = &step.scatter {
                entry.scattered.extend(scatter.fields.iter().cloned());
            }
            for (port, source) in &step.sources {
                entry
                    .supplied
                    .entry(port.clone())
                    .or_default()
                    .push(Supplied {
                        key: source.canonical_key(),
                        kind: classify(scope, source),
                    });
            }
        }

        for output in scope.sorted_outputs() {
            mark_consumed(scope, &output.source, &mut usage);
        }
    }

    (tools, usage)
}

fn mark_consumed(scope: &Workflow, expr: &Expression, usage: &mut HashMap<NodeId, ToolUsage>) {
    for leaf in expr.leaves() {
        if let Leaf::StepOutput(target, output) = leaf {
            if let Some(producer) = scope.step(target.uuid) {
                usage
                    .entry(producer.tool.uuid())
                    .or_default()
                    .consumed
                    .insert(output.to_string());
            }
        }
    }
}

fn classify(scope: &Workflow, source: &Expression) -> SourceKind {
    match source {
        Expression::InputRef { target } => match scope.input(target.uuid) {
            Some(input) => SourceKind::WorkflowInput {
                optional: input.datatype.optional,
                placeholder: input.value.clone().filter(|_| input.is_placeholder()),
            },
            None => SourceKind::Other,
        },
        Expression::StepOutputRef { .. } => SourceKind::Connection,
        Expression::Literal { .. } => SourceKind::Literal,
        Expression::ToolInputRef { .. }
        | Expression::Operator { .. }
        | Expression::Template { .. }
        | Expression::Filename { .. } => SourceKind::Other,
    }
}

/// The value to migrate if `supplied` is one placeholder, the same at
/// every call site.
fn placeholder_value(supplied: &[Supplied], call_sites: usize) -> Option<Value> {
    if call_sites == 0 || supplied.len() != call_sites {
        return None;
    }
    let first = supplied.first()?;
    if supplied.iter().any(|s| s.key != first.key) {
        return None;
    }
    match &first.kind {
        SourceKind::WorkflowInput { placeholder, .. } => placeholder.clone(),
        SourceKind::Literal | SourceKind::Connection | SourceKind::Other => None,
    }
}

/// Whether the sources supplied for one input keep it alive.
fn sources_keep(supplied: &[Supplied], call_sites: usize) -> bool {
    let distinct: HashSet<&str> = supplied.iter().map(|s| s.key.as_str()).collect();

    let forced = supplied.iter().any(|s| match s.kind {
        SourceKind::WorkflowInput { optional, .. } => !optional,
        SourceKind::Connection | SourceKind::Literal | SourceKind::Other => true,
    });

    // a single source may differ from the default at the other call sites
    forced || distinct.len() >= 2 || (distinct.len() == 1 && call_sites >= 2)
}

fn plan_tool(tool: &Tool, usage: &ToolUsage, mode: SimplificationMode) -> Result<ToolPlan> {
    let mut plan = ToolPlan::default();
    let Some((inputs, outputs, arguments)) = interface(tool) else {
        return Ok(plan);
    };

    for output in outputs {
        if !output.datatype.optional || usage.consumed.contains(&output.id) {
            plan.kept_outputs.insert(output.uuid);
        }
    }

    let read_by_selectors: BTreeSet<NodeId> = outputs
        .iter()
        .filter(|o| plan.kept_outputs.contains(&o.uuid))
        .filter_map(|o| o.selector.as_ref())
        .flat_map(Expression::tool_inputs)
        .collect();

    for input in inputs {
        let supplied = usage
            .supplied
            .get(&input.id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        if mode == SimplificationMode::On && !usage.scattered.contains(&input.id) {
            if let Some(value) = placeholder_value(supplied, usage.call_sites) {
                debug!(
                    "Migrating placeholder {} onto default of '{}.{}'",
                    value,
                    tool.id(),
                    input.id
                );
                plan.migrated.insert(input.uuid, value);
                plan.kept_inputs.insert(input.uuid);
                continue;
            }
        }

        let keep = !input.datatype.optional
            || input.has_default()
            || read_by_selectors.contains(&input.uuid)
            || (mode == SimplificationMode::On && sources_keep(supplied, usage.call_sites));
        if keep {
            plan.kept_inputs.insert(input.uuid);
        }
    }

    // promote inputs read by surviving defaults and arguments
    let declared: HashSet<NodeId> = inputs.iter().map(|i| i.uuid).collect();
    loop {
        let mut reads: BTreeSet<NodeId> = inputs
            .iter()
            .filter(|i| plan.kept_inputs.contains(&i.uuid))
            .filter_map(|i| i.default.as_ref())
            .flat_map(Expression::tool_inputs)
            .collect();
        for argument in arguments {
            let refs = argument.value.tool_inputs();
            if refs.is_empty() || refs.iter().any(|r| plan.kept_inputs.contains(r)) {
                reads.extend(refs);
            }
        }

        let before = plan.kept_inputs.len();
        plan.kept_inputs
            .extend(reads.into_iter().filter(|r| declared.contains(r)));
        if plan.kept_inputs.len() == before {
            break;
        }
    }

    for field in &usage.scattered {
        if let Some(input) = inputs.iter().find(|i| &i.id == field) {
            if !plan.kept_inputs.contains(&input.uuid) {
                return Err(TranslateError::PruneInconsistency {
                    tool: tool.id().to_string(),
                    uuid: tool.uuid(),
                    reason: format!("scatter field '{}' would be removed", field),
                });
            }
        }
    }

    Ok(plan)
}

#[derive(Debug, Default)]
struct Removed {
    inputs: usize,
    outputs: usize,
    arguments: usize,
}

/// Builds the pruned copy of a tool. Also returns the input ids whose
/// call-site sources must go.
fn apply_plan(tool: &Tool, plan: &ToolPlan) -> (Tool, HashSet<String>, Removed) {
    let mut pruned = tool.clone();
    let mut dropped = HashSet::new();
    let mut removed = Removed::default();

    match &mut pruned {
        Tool::Command(command) => {
            prune_ports(&mut command.inputs, &mut command.outputs, plan, &mut dropped, &mut removed);
            let before = command.arguments.len();
            command.arguments = prune_arguments(&command.arguments, &plan.kept_inputs);
            removed.arguments = before - command.arguments.len();
        }
        Tool::Code(code) => {
            prune_ports(&mut code.inputs, &mut code.outputs, plan, &mut dropped, &mut removed);
        }
        Tool::Workflow(_) => {}
    }

    (pruned, dropped, removed)
}

fn prune_ports(
    inputs: &mut Vec<ToolInput>,
    outputs: &mut Vec<ToolOutput>,
    plan: &ToolPlan,
    dropped: &mut HashSet<String>,
    removed: &mut Removed,
) {
    for input in inputs.iter_mut() {
        if let Some(value) = plan.migrated.get(&input.uuid) {
            input.default = Some(Expression::literal(value.clone()));
            dropped.insert(input.id.clone());
        } else if !plan.kept_inputs.contains(&input.uuid) {
            debug!("Removing input '{}'", input.id);
            dropped.insert(input.id.clone());
            removed.inputs += 1;
        }
    }
    inputs.retain(|i| plan.kept_inputs.contains(&i.uuid));

    let before = outputs.len();
    outputs.retain(|o| plan.kept_outputs.contains(&o.uuid));
    removed.outputs = before - outputs.len();
}

/// Drops arguments that only read removed inputs. A dropped value without
/// a prefix takes the bare flag right before it along.
fn prune_arguments(arguments: &[ToolArgument], kept: &HashSet<NodeId>) -> Vec<ToolArgument> {
    let mut dead = vec![false; arguments.len()];

    for (i, argument) in arguments.iter().enumerate() {
        let refs = argument.value.tool_inputs();
        if refs.is_empty() || refs.iter().any(|r| kept.contains(r)) {
            continue;
        }
        dead[i] = true;
        if argument.prefix.is_none() && i > 0 && arguments[i - 1].is_bare_flag() {
            dead[i - 1] = true;
        }
    }

    arguments
        .iter()
        .zip(dead)
        .filter(|(_, dead)| !dead)
        .map(|(argument, _)| argument.clone())
        .collect()
}

/// Verifies nothing in the tree still points at a removed port.
fn check_consistency(workflow: &Workflow) -> Result<()> {
    for scope in workflow.scopes() {
        for step in scope.sorted_steps() {
            let tool = &step.tool;
            let inconsistency = |reason: String| TranslateError::PruneInconsistency {
                tool: tool.id().to_string(),
                uuid: tool.uuid(),
                reason,
            };

            for port in step.sources.keys() {
                if tool.input_port(port).is_none() {
                    return Err(inconsistency(format!(
                        "step '{}' still supplies removed input '{}'",
                        step.id, port
                    )));
                }
            }
            if let Some(scatter) = &step.scatter {
                for field in &scatter.fields {
                    if tool.input_port(field).is_none() {
                        return Err(inconsistency(format!(
                            "step '{}' scatters over removed input '{}'",
                            step.id, field
                        )));
                    }
                }
            }

            if let Some((inputs, outputs, arguments)) = interface(tool) {
                let declared: BTreeSet<NodeId> = inputs.iter().map(|i| i.uuid).collect();
                let expressions = inputs
                    .iter()
                    .filter_map(|i| i.default.as_ref())
                    .chain(outputs.iter().filter_map(|o| o.selector.as_ref()))
                    .chain(arguments.iter().map(|a| &a.value));
                for expr in expressions {
                    if let Some(missing) = expr.tool_inputs().difference(&declared).next() {
                        return Err(inconsistency(format!(
                            "an expression still reads removed input {}",
                            missing
                        )));
                    }
                }
            }

            for expr in step.expressions() {
                check_step_outputs(scope, expr)?;
            }
        }

        for output in scope.sorted_outputs() {
            check_step_outputs(scope, &output.source)?;
        }
    }
    Ok(())
}

fn check_step_outputs(scope: &Workflow, expr: &Expression) -> Result<()> {
    for leaf in expr.leaves() {
        if let Leaf::StepOutput(target, output) = leaf {
            if let Some(producer) = scope.step(target.uuid) {
                if producer.tool.output_port(output).is_none() {
                    return Err(TranslateError::PruneInconsistency {
                        tool: producer.tool.id().to_string(),
                        uuid: producer.tool.uuid(),
                        reason: format!(
                            "output '{}' of step '{}' was removed but is still read",
                            output, producer.id
                        ),
                    });
                }
            }
        }
    }
    Ok(())
}
