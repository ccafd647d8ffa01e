//! Connection Analysis
//!
//! Resolves expression trees to the nodes they read from and enumerates
//! every producer -> consumer connection in a workflow tree. Read-only.

use log::debug;

use super::expression::{Expression, Leaf};
use super::model::{NodeId, StepNode, Workflow};
use super::tool::{Port, Tool};
use super::types::DataType;
use crate::error::{Result, TranslateError};

/// A node an expression ultimately reads from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Origin {
    /// A workflow input node
    Input(NodeId),
    /// One output of a step
    StepOutput { step: NodeId, output: String },
}

impl Origin {
    /// The step this origin belongs to, if any.
    pub fn step(&self) -> Option<NodeId> {
        match self {
            Self::Input(_) => None,
            Self::StepOutput { step, .. } => Some(*step),
        }
    }
}

/// Resolves an expression to every workflow input / step output it reads.
///
/// The result is sorted and deduplicated. Literals resolve to nothing;
/// a reference whose UUID is not live in `workflow` is an error.
pub fn resolve(expr: &Expression, workflow: &Workflow) -> Result<Vec<Origin>> {
    let mut origins = Vec::new();

    for leaf in expr.leaves() {
        match leaf {
            Leaf::Input(target) => {
                if workflow.input(target.uuid).is_none() {
                    return Err(unresolved(workflow, &target.id, target.uuid, "input"));
                }
                origins.push(Origin::Input(target.uuid));
            }
            Leaf::StepOutput(target, output) => {
                let step = workflow
                    .step(target.uuid)
                    .ok_or_else(|| unresolved(workflow, &target.id, target.uuid, "step"))?;
                if step.tool.output_port(output).is_none() {
                    return Err(unresolved(
                        workflow,
                        &target.id,
                        target.uuid,
                        &format!("output '{}' of step '{}'", output, step.id),
                    ));
                }
                origins.push(Origin::StepOutput {
                    step: target.uuid,
                    output: output.to_string(),
                });
            }
            Leaf::ToolInput(target) => {
                return Err(unresolved(
                    workflow,
                    &target.id,
                    target.uuid,
                    "tool input (tool selectors are not valid at workflow level)",
                ));
            }
        }
    }

    origins.sort();
    origins.dedup();
    Ok(origins)
}

fn unresolved(workflow: &Workflow, node: &str, uuid: NodeId, target: &str) -> TranslateError {
    TranslateError::UnresolvedReference {
        workflow: workflow.id.clone(),
        node: node.to_string(),
        uuid,
        target: target.to_string(),
    }
}

/// The place in the tree that holds an endpoint's data type.
///
/// Ports of a subworkflow tool are its input/output nodes, so a
/// connection into a subworkflow and the connections inside it share
/// slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeSlot {
    WorkflowInput(NodeId),
    WorkflowOutput(NodeId),
    ToolInput { tool: NodeId, port: NodeId },
    ToolOutput { tool: NodeId, port: NodeId },
}

/// One side of a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    /// Id of the workflow that owns this endpoint
    pub scope: String,
    /// The input, step or output node
    pub node: NodeId,
    /// Printable name, e.g. `align.reads`
    pub label: String,
    pub slot: TypeSlot,
    pub datatype: DataType,
}

/// A derived producer -> consumer fact.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub producer: Endpoint,
    pub consumer: Endpoint,
}

impl Connection {
    /// Both ends are file-like, the consumer declares no secondary files
    /// and the producer declares some.
    pub fn has_bare_consumer(&self) -> bool {
        match (self.producer.datatype.signature(), self.consumer.datatype.signature()) {
            (Some(produced), Some(consumed)) => consumed.is_empty() && !produced.is_empty(),
            _ => false,
        }
    }

    /// Both ends are file-like and the consumer expects secondary files the
    /// producer does not declare.
    pub fn is_unsatisfied(&self) -> bool {
        match (self.producer.datatype.signature(), self.consumer.datatype.signature()) {
            (Some(produced), Some(consumed)) => !consumed.is_subset(&produced),
            _ => false,
        }
    }

    /// True if either endpoint occupies `slot`.
    pub fn touches(&self, slot: TypeSlot) -> bool {
        self.producer.slot == slot || self.consumer.slot == slot
    }
}

/// Enumerates every connection in the tree, scopes in depth-first order.
pub fn gather_connections(workflow: &Workflow) -> Result<Vec<Connection>> {
    let mut connections = Vec::new();

    for scope in workflow.scopes() {
        for step in scope.sorted_steps() {
            let mut ports: Vec<&String> = step.sources.keys().collect();
            ports.sort();

            for port_id in ports {
                let port = step.tool.input_port(port_id).ok_or_else(|| {
                    unresolved(
                        scope,
                        &step.id,
                        step.uuid,
                        &format!("tool input '{}' of '{}'", port_id, step.tool.id()),
                    )
                })?;
                let consumer = Endpoint {
                    scope: scope.id.clone(),
                    node: step.uuid,
                    label: format!("{}.{}", step.id, port.id),
                    slot: input_slot(&step.tool, &port),
                    datatype: port.datatype.clone(),
                };

                for origin in resolve(&step.sources[port_id.as_str()], scope)? {
                    connections.push(Connection {
                        producer: producer_endpoint(scope, &origin)?,
                        consumer: consumer.clone(),
                    });
                }
            }
        }

        for output in scope.sorted_outputs() {
            let consumer = Endpoint {
                scope: scope.id.clone(),
                node: output.uuid,
                label: output.id.clone(),
                slot: TypeSlot::WorkflowOutput(output.uuid),
                datatype: output.datatype.clone(),
            };
            for origin in resolve(&output.source, scope)? {
                connections.push(Connection {
                    producer: producer_endpoint(scope, &origin)?,
                    consumer: consumer.clone(),
                });
            }
        }
    }

    debug!(
        "Gathered {} connections in workflow '{}'",
        connections.len(),
        workflow.id
    );
    Ok(connections)
}

fn producer_endpoint(scope: &Workflow, origin: &Origin) -> Result<Endpoint> {
    match origin {
        Origin::Input(uuid) => {
            let input = scope
                .input(*uuid)
                .ok_or_else(|| unresolved(scope, "?", *uuid, "input"))?;
            Ok(Endpoint {
                scope: scope.id.clone(),
                node: input.uuid,
                label: input.id.clone(),
                slot: TypeSlot::WorkflowInput(input.uuid),
                datatype: input.datatype.clone(),
            })
        }
        Origin::StepOutput { step, output } => {
            let node: &StepNode = scope
                .step(*step)
                .ok_or_else(|| unresolved(scope, "?", *step, "step"))?;
            let port = node.tool.output_port(output).ok_or_else(|| {
                unresolved(scope, &node.id, node.uuid, &format!("output '{}'", output))
            })?;
            Ok(Endpoint {
                scope: scope.id.clone(),
                node: node.uuid,
                label: format!("{}.{}", node.id, port.id),
                slot: output_slot(&node.tool, &port),
                datatype: port.datatype.clone(),
            })
        }
    }
}

fn input_slot(tool: &Tool, port: &Port<'_>) -> TypeSlot {
    match tool {
        Tool::Workflow(_) => TypeSlot::WorkflowInput(port.uuid),
        Tool::Command(_) | Tool::Code(_) => TypeSlot::ToolInput {
            tool: tool.uuid(),
            port: port.uuid,
        },
    }
}

fn output_slot(tool: &Tool, port: &Port<'_>) -> TypeSlot {
    match tool {
        Tool::Workflow(_) => TypeSlot::WorkflowOutput(port.uuid),
        Tool::Command(_) | Tool::Code(_) => TypeSlot::ToolOutput {
            tool: tool.uuid(),
            port: port.uuid,
        },
    }
}
