//! Step Planner
//!
//! Builds the step dependency graph of one workflow scope and orders its
//! steps for emission:
//! - Dependency edges derived from step sources, `when` and `foreach`
//! - Cycle detection
//! - Deterministic topological ordering

use std::collections::{BTreeSet, HashMap};

use log::debug;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;

use super::connections::resolve;
use super::model::{NodeId, Workflow};
use crate::error::{Result, TranslateError};

/// Step-to-step dependency graph of a single workflow scope.
#[derive(Debug, Clone)]
pub struct StepGraph {
    graph: DiGraph<NodeId, ()>,
    index: HashMap<NodeId, NodeIndex>,
}

impl StepGraph {
    /// Number of steps in the graph.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// True if `consumer` reads directly from `producer`.
    pub fn has_edge(&self, producer: NodeId, consumer: NodeId) -> bool {
        match (self.index.get(&producer), self.index.get(&consumer)) {
            (Some(&a), Some(&b)) => self.graph.contains_edge(a, b),
            _ => false,
        }
    }

    /// Every `(producer, consumer)` edge.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        self.graph
            .raw_edges()
            .iter()
            .map(|edge| (self.graph[edge.source()], self.graph[edge.target()]))
            .collect()
    }

    /// Steps this step reads from directly.
    pub fn dependencies(&self, step: NodeId) -> Vec<NodeId> {
        self.neighbors(step, Direction::Incoming)
    }

    /// Steps that read from this step directly.
    pub fn dependents(&self, step: NodeId) -> Vec<NodeId> {
        self.neighbors(step, Direction::Outgoing)
    }

    fn neighbors(&self, step: NodeId, direction: Direction) -> Vec<NodeId> {
        let Some(&node) = self.index.get(&step) else {
            return Vec::new();
        };
        let mut found: Vec<NodeId> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n])
            .collect();
        found.sort();
        found.dedup();
        found
    }

    /// Number of steps transitively downstream of `step`.
    pub fn descendant_count(&self, step: NodeId) -> usize {
        let Some(&start) = self.index.get(&step) else {
            return 0;
        };
        let mut dfs = Dfs::new(&self.graph, start);
        let mut count = 0;
        while dfs.next(&self.graph).is_some() {
            count += 1;
        }
        count - 1
    }
}

/// Builds the dependency graph of `workflow`'s own steps.
///
/// Fails with `GraphCycle` if the graph is not a DAG, and with
/// `UnresolvedReference` if a step reads from a node that does not exist.
pub fn build_step_graph(workflow: &Workflow) -> Result<StepGraph> {
    let mut graph = DiGraph::new();
    let mut index = HashMap::new();

    for uuid in workflow.sorted_step_ids() {
        index.insert(uuid, graph.add_node(uuid));
    }

    for step in workflow.sorted_steps() {
        for expr in step.expressions() {
            for origin in resolve(expr, workflow)? {
                if let Some(producer) = origin.step() {
                    graph.update_edge(index[&producer], index[&step.uuid], ());
                }
            }
        }
    }

    if let Err(cycle) = toposort(&graph, None) {
        let uuid = graph[cycle.node_id()];
        let step = workflow
            .step(uuid)
            .map(|s| s.id.clone())
            .unwrap_or_default();
        return Err(TranslateError::GraphCycle {
            workflow: workflow.id.clone(),
            step,
            uuid,
        });
    }

    debug!(
        "Step graph for '{}': {} steps, {} edges",
        workflow.id,
        graph.node_count(),
        graph.edge_count()
    );

    Ok(StepGraph { graph, index })
}

/// Orders `workflow`'s steps so every producer precedes its consumers.
///
/// Kahn's algorithm; among ready steps, those with fewer transitive
/// descendants go first, then by id, then by UUID.
pub fn topological_order(workflow: &Workflow) -> Result<Vec<NodeId>> {
    let graph = build_step_graph(workflow)?;

    let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
    let mut ready: BTreeSet<(usize, String, NodeId)> = BTreeSet::new();

    for step in workflow.sorted_steps() {
        let degree = graph.dependencies(step.uuid).len();
        in_degree.insert(step.uuid, degree);
        if degree == 0 {
            ready.insert(sort_key(workflow, &graph, step.uuid));
        }
    }

    let mut order = Vec::with_capacity(workflow.steps.len());

    while let Some(next) = ready.pop_first() {
        let current = next.2;
        order.push(current);

        for dependent in graph.dependents(current) {
            if let Some(degree) = in_degree.get_mut(&dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(sort_key(workflow, &graph, dependent));
                }
            }
        }
    }

    debug!(
        "Topological order for '{}': {:?}",
        workflow.id,
        order
            .iter()
            .filter_map(|uuid| workflow.step(*uuid).map(|s| s.id.as_str()))
            .collect::<Vec<_>>()
    );

    Ok(order)
}

fn sort_key(workflow: &Workflow, graph: &StepGraph, step: NodeId) -> (usize, String, NodeId) {
    let id = workflow
        .step(step)
        .map(|s| s.id.clone())
        .unwrap_or_default();
    (graph.descendant_count(step), id, step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{
        CommandTool, DataType, Expression, InputNode, StepNode, Tool, ToolInput, ToolOutput,
    };

    fn passthrough() -> Tool {
        Tool::Command(
            CommandTool::new("cat")
                .with_input(ToolInput::new("inp", DataType::file().into_optional()))
                .with_output(ToolOutput::new("out", DataType::file())),
        )
    }

    fn ids(workflow: &Workflow, order: &[NodeId]) -> Vec<String> {
        order
            .iter()
            .map(|uuid| workflow.step(*uuid).unwrap().id.clone())
            .collect()
    }

    #[test]
    fn test_linear_chain_order() {
        let mut workflow = Workflow::new("main");
        let a = StepNode::new("A", passthrough());
        let b = StepNode::new("B", passthrough()).with_source("inp", a.output("out"));
        let c = StepNode::new("C", passthrough()).with_source("inp", b.output("out"));

        // inserted out of order on purpose
        workflow.add_step(c).unwrap();
        workflow.add_step(a).unwrap();
        workflow.add_step(b).unwrap();

        let order = topological_order(&workflow).unwrap();
        assert_eq!(ids(&workflow, &order), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_every_edge_respects_order() {
        let mut workflow = Workflow::new("main");
        let root = StepNode::new("root", passthrough());
        let left = StepNode::new("left", passthrough()).with_source("inp", root.output("out"));
        let right = StepNode::new("right", passthrough()).with_source("inp", root.output("out"));
        let join = StepNode::new("join", passthrough()).with_source(
            "inp",
            Expression::operator("pick", vec![left.output("out"), right.output("out")]),
        );
        for step in [join, right, left, root] {
            workflow.add_step(step).unwrap();
        }

        let graph = build_step_graph(&workflow).unwrap();
        let order = topological_order(&workflow).unwrap();
        let position = |uuid: NodeId| order.iter().position(|s| *s == uuid).unwrap();

        assert_eq!(graph.edges().len(), 4);
        for (producer, consumer) in graph.edges() {
            assert!(position(producer) < position(consumer));
        }
    }

    #[test]
    fn test_ties_prefer_fewer_descendants() {
        let mut workflow = Workflow::new("main");
        // "a_feeder" feeds two steps, "z_leaf" feeds nothing
        let feeder = StepNode::new("a_feeder", passthrough());
        let leaf = StepNode::new("z_leaf", passthrough());
        let x = StepNode::new("x", passthrough()).with_source("inp", feeder.output("out"));
        let y = StepNode::new("y", passthrough()).with_source("inp", x.output("out"));
        for step in [feeder, leaf, x, y] {
            workflow.add_step(step).unwrap();
        }

        let order = topological_order(&workflow).unwrap();
        assert_eq!(ids(&workflow, &order), vec!["z_leaf", "a_feeder", "x", "y"]);
    }

    #[test]
    fn test_ties_by_id() {
        let mut workflow = Workflow::new("main");
        for id in ["gamma", "alpha", "beta"] {
            workflow.add_step(StepNode::new(id, passthrough())).unwrap();
        }
        let order = topological_order(&workflow).unwrap();
        assert_eq!(ids(&workflow, &order), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_cycle_is_detected() {
        let mut workflow = Workflow::new("main");
        let mut a = StepNode::new("a", passthrough());
        let b = StepNode::new("b", passthrough()).with_source("inp", a.output("out"));
        a.sources.insert("inp".to_string(), b.output("out"));
        workflow.add_step(a).unwrap();
        workflow.add_step(b).unwrap();

        let err = build_step_graph(&workflow).unwrap_err();
        assert!(matches!(err, TranslateError::GraphCycle { .. }));
        assert!(topological_order(&workflow).is_err());
    }

    #[test]
    fn test_when_creates_dependency() {
        let mut workflow = Workflow::new("main");
        let flag = InputNode::new("run_qc", DataType::boolean());
        let check = StepNode::new("check", passthrough());
        let gated = StepNode::new("gated", passthrough()).with_when(Expression::operator(
            "and",
            vec![flag.reference(), check.output("out")],
        ));
        let (check_id, gated_id) = (check.uuid, gated.uuid);
        workflow.add_input(flag).unwrap();
        workflow.add_step(gated).unwrap();
        workflow.add_step(check).unwrap();

        let graph = build_step_graph(&workflow).unwrap();
        assert!(graph.has_edge(check_id, gated_id));
        assert_eq!(graph.dependencies(gated_id), vec![check_id]);
        assert_eq!(graph.descendant_count(check_id), 1);
    }
}
