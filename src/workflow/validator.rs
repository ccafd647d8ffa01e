//! Workflow Validation
//!
//! Checks the structural invariants the passes rely on:
//! - Sibling ids are unique within each scope
//! - Every selector resolves to a live node
//! - Step `sources` keys and scatter fields name declared tool inputs
//! - Tool selectors only read the tool's own inputs
//! - The step dependency graph of every scope is acyclic

use std::collections::HashSet;

use log::{debug, info};

use super::connections::resolve;
use super::expression::{Expression, Leaf};
use super::model::{StepNode, Workflow};
use super::planner::build_step_graph;
use super::tool::{Tool, ToolInput, ToolOutput};
use crate::error::{Result, TranslateError};

/// Validates the whole tree, stopping at the first violation.
pub fn validate_workflow(workflow: &Workflow) -> Result<()> {
    info!("Validating workflow '{}'", workflow.id);

    for scope in workflow.scopes() {
        validate_scope(scope)?;
    }

    info!(
        "Workflow validated: {} scopes, {} top-level steps",
        workflow.scopes().len(),
        workflow.len()
    );
    Ok(())
}

fn validate_scope(scope: &Workflow) -> Result<()> {
    check_unique(scope, "inputs", scope.inputs.values().map(|n| n.id.as_str()))?;
    check_unique(scope, "steps", scope.steps.values().map(|n| n.id.as_str()))?;
    check_unique(scope, "outputs", scope.outputs.values().map(|n| n.id.as_str()))?;

    for input in scope.sorted_inputs() {
        if let Some(default) = &input.default {
            resolve(default, scope)?;
        }
    }

    for step in scope.sorted_steps() {
        validate_step(scope, step)?;
    }

    for output in scope.sorted_outputs() {
        resolve(&output.source, scope)?;
    }

    // resolves every step expression and rejects cycles
    build_step_graph(scope)?;

    debug!("Scope '{}' is valid", scope.id);
    Ok(())
}

fn check_unique<'a>(
    scope: &Workflow,
    kind: &str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(TranslateError::DuplicateId {
                scope: format!("{} of workflow '{}'", kind, scope.id),
                id: id.to_string(),
            });
        }
    }
    Ok(())
}

fn validate_step(scope: &Workflow, step: &StepNode) -> Result<()> {
    for port in step.sources.keys() {
        if step.tool.input_port(port).is_none() {
            return Err(unknown_port(scope, step, port));
        }
    }

    if let Some(scatter) = &step.scatter {
        for field in &scatter.fields {
            if step.tool.input_port(field).is_none() {
                return Err(unknown_port(scope, step, field));
            }
        }
    }

    match &step.tool {
        Tool::Command(tool) => {
            check_unique_ports(&tool.id, &tool.inputs, &tool.outputs)?;
            let mut expressions: Vec<&Expression> =
                tool.arguments.iter().map(|a| &a.value).collect();
            expressions.extend(port_expressions(&tool.inputs, &tool.outputs));
            check_tool_selectors(&tool.id, &tool.inputs, &expressions)
        }
        Tool::Code(tool) => {
            check_unique_ports(&tool.id, &tool.inputs, &tool.outputs)?;
            let expressions = port_expressions(&tool.inputs, &tool.outputs);
            check_tool_selectors(&tool.id, &tool.inputs, &expressions)
        }
        // nested scopes are validated on their own
        Tool::Workflow(_) => Ok(()),
    }
}

fn unknown_port(scope: &Workflow, step: &StepNode, port: &str) -> TranslateError {
    TranslateError::UnresolvedReference {
        workflow: scope.id.clone(),
        node: step.id.clone(),
        uuid: step.uuid,
        target: format!("tool input '{}' of '{}'", port, step.tool.id()),
    }
}

fn check_unique_ports(tool: &str, inputs: &[ToolInput], outputs: &[ToolOutput]) -> Result<()> {
    let mut seen = HashSet::new();
    for id in inputs.iter().map(|i| &i.id) {
        if !seen.insert(id) {
            return Err(TranslateError::DuplicateId {
                scope: format!("inputs of tool '{}'", tool),
                id: id.clone(),
            });
        }
    }
    let mut seen = HashSet::new();
    for id in outputs.iter().map(|o| &o.id) {
        if !seen.insert(id) {
            return Err(TranslateError::DuplicateId {
                scope: format!("outputs of tool '{}'", tool),
                id: id.clone(),
            });
        }
    }
    Ok(())
}

fn port_expressions<'a>(inputs: &'a [ToolInput], outputs: &'a [ToolOutput]) -> Vec<&'a Expression> {
    inputs
        .iter()
        .filter_map(|i| i.default.as_ref())
        .chain(outputs.iter().filter_map(|o| o.selector.as_ref()))
        .collect()
}

/// Tool-level expressions may only read the tool's own inputs.
fn check_tool_selectors(tool: &str, inputs: &[ToolInput], expressions: &[&Expression]) -> Result<()> {
    let declared: HashSet<_> = inputs.iter().map(|i| i.uuid).collect();

    for expr in expressions {
        for leaf in expr.leaves() {
            let (target, what) = match leaf {
                Leaf::ToolInput(target) if declared.contains(&target.uuid) => continue,
                Leaf::ToolInput(target) => (target, "tool input"),
                Leaf::Input(target) => (target, "workflow input (not visible inside a tool)"),
                Leaf::StepOutput(target, _) => (target, "step output (not visible inside a tool)"),
            };
            return Err(TranslateError::UnresolvedReference {
                workflow: tool.to_string(),
                node: target.id.clone(),
                uuid: target.uuid,
                target: what.to_string(),
            });
        }
    }
    Ok(())
}

/// Collects every validation problem as a message instead of stopping at
/// the first one.
pub fn quick_validate(workflow: &Workflow) -> Vec<String> {
    workflow
        .scopes()
        .into_iter()
        .filter_map(|scope| validate_scope(scope).err())
        .map(|e| e.to_string())
        .collect()
}
