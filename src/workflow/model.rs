//! Workflow Data Model
//!
//! The graph of inputs, steps and outputs that every pass rewrites.
//! Each workflow owns its nodes in UUID-keyed maps; subworkflows are owned
//! by the step that runs them, so the whole pipeline is one tree.
//!
//! # Example
//!
//! ```
//! use wfbridge::workflow::{
//!     CommandTool, DataType, InputNode, OutputNode, StepNode, Tool, ToolInput, ToolOutput,
//!     Workflow,
//! };
//!
//! let mut workflow = Workflow::new("align_sample");
//!
//! let reads = InputNode::new("reads", DataType::file());
//! let reads_ref = reads.reference();
//! workflow.add_input(reads).unwrap();
//!
//! let bwa = CommandTool::new("bwa_mem")
//!     .with_input(ToolInput::new("reads", DataType::file()))
//!     .with_output(ToolOutput::new("out", DataType::file()));
//! let step = StepNode::new("align", Tool::Command(bwa)).with_source("reads", reads_ref);
//! let aligned = step.output("out");
//! workflow.add_step(step).unwrap();
//!
//! workflow
//!     .add_output(OutputNode::new("bam", DataType::file(), aligned))
//!     .unwrap();
//! assert_eq!(workflow.len(), 1);
//! ```

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::expression::{Expression, Reference};
use super::tool::Tool;
use super::types::DataType;
use crate::error::{Result, TranslateError};

/// Permanent identity of a node; never changes across renaming.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A workflow input.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InputNode {
    #[serde(default)]
    pub uuid: NodeId,

    pub id: String,

    pub datatype: DataType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Expression>,

    /// Static value fixed by the ingester (e.g. a literal lifted out of a
    /// step's `in:` block)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl InputNode {
    pub fn new(id: impl Into<String>, datatype: DataType) -> Self {
        Self {
            uuid: NodeId::new(),
            id: id.into(),
            datatype,
            default: None,
            value: None,
        }
    }

    pub fn with_default(mut self, default: Expression) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// A selector reading this input.
    pub fn reference(&self) -> Expression {
        Expression::InputRef {
            target: Reference::new(self.uuid, &self.id),
        }
    }

    /// True if this input only carries a literal the ingester lifted out of
    /// a step.
    pub fn is_placeholder(&self) -> bool {
        self.value.as_ref().map(|v| !v.is_null()).unwrap_or(false)
    }
}

/// A workflow output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OutputNode {
    #[serde(default)]
    pub uuid: NodeId,

    pub id: String,

    pub datatype: DataType,

    pub source: Expression,
}

impl OutputNode {
    pub fn new(id: impl Into<String>, datatype: DataType, source: Expression) -> Self {
        Self {
            uuid: NodeId::new(),
            id: id.into(),
            datatype,
            source,
        }
    }
}

/// How scattered inputs are combined.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScatterMethod {
    /// Parallel zip
    Dot,
    /// Full cross product
    Cross,
}

/// Runs a step once per element of the listed tool inputs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Scatter {
    pub fields: BTreeSet<String>,
    pub method: ScatterMethod,
}

/// A call of a tool inside a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepNode {
    #[serde(default)]
    pub uuid: NodeId,

    pub id: String,

    pub tool: Tool,

    /// Tool input id -> value supplied at this call site
    #[serde(default)]
    pub sources: IndexMap<String, Expression>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scatter: Option<Scatter>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Expression>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreach: Option<Expression>,
}

impl StepNode {
    pub fn new(id: impl Into<String>, tool: Tool) -> Self {
        Self {
            uuid: NodeId::new(),
            id: id.into(),
            tool,
            sources: IndexMap::new(),
            scatter: None,
            when: None,
            foreach: None,
        }
    }

    pub fn with_source(mut self, port: impl Into<String>, source: Expression) -> Self {
        self.sources.insert(port.into(), source);
        self
    }

    pub fn with_scatter(mut self, fields: &[&str], method: ScatterMethod) -> Self {
        self.scatter = Some(Scatter {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            method,
        });
        self
    }

    pub fn with_when(mut self, condition: Expression) -> Self {
        self.when = Some(condition);
        self
    }

    pub fn with_foreach(mut self, items: Expression) -> Self {
        self.foreach = Some(items);
        self
    }

    /// A selector reading one of this step's outputs.
    pub fn output(&self, tag: impl Into<String>) -> Expression {
        Expression::StepOutputRef {
            step: Reference::new(self.uuid, &self.id),
            output: tag.into(),
        }
    }

    /// Every expression attached to this call site: sources (sorted by
    /// port id), then `when`, then `foreach`.
    pub fn expressions(&self) -> Vec<&Expression> {
        let mut ports: Vec<&String> = self.sources.keys().collect();
        ports.sort();
        ports
            .into_iter()
            .filter_map(|port| self.sources.get(port))
            .chain(self.when.iter())
            .chain(self.foreach.iter())
            .collect()
    }

    pub fn expressions_mut(&mut self) -> Vec<&mut Expression> {
        self.sources
            .values_mut()
            .chain(self.when.iter_mut())
            .chain(self.foreach.iter_mut())
            .collect()
    }
}

/// A workflow: a scope of inputs, steps and outputs.
///
/// A workflow can itself be a step's tool; its tool interface is derived
/// from its input and output nodes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Workflow {
    #[serde(default)]
    pub uuid: NodeId,

    pub id: String,

    #[serde(default, with = "node_map")]
    pub inputs: IndexMap<NodeId, InputNode>,

    #[serde(default, with = "node_map")]
    pub steps: IndexMap<NodeId, StepNode>,

    #[serde(default, with = "node_map")]
    pub outputs: IndexMap<NodeId, OutputNode>,
}

impl Workflow {
    /// Creates a new empty workflow.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            uuid: NodeId::new(),
            id: id.into(),
            inputs: IndexMap::new(),
            steps: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }

    /// Adds an input, rejecting a display id already used by another input.
    pub fn add_input(&mut self, input: InputNode) -> Result<NodeId> {
        if self.inputs.values().any(|i| i.id == input.id) {
            return Err(self.duplicate("inputs", &input.id));
        }
        let uuid = input.uuid;
        self.inputs.insert(uuid, input);
        Ok(uuid)
    }

    /// Adds a step, rejecting a display id already used by another step.
    pub fn add_step(&mut self, step: StepNode) -> Result<NodeId> {
        if self.steps.values().any(|s| s.id == step.id) {
            return Err(self.duplicate("steps", &step.id));
        }
        let uuid = step.uuid;
        self.steps.insert(uuid, step);
        Ok(uuid)
    }

    /// Adds an output, rejecting a display id already used by another output.
    pub fn add_output(&mut self, output: OutputNode) -> Result<NodeId> {
        if self.outputs.values().any(|o| o.id == output.id) {
            return Err(self.duplicate("outputs", &output.id));
        }
        let uuid = output.uuid;
        self.outputs.insert(uuid, output);
        Ok(uuid)
    }

    fn duplicate(&self, kind: &str, id: &str) -> TranslateError {
        TranslateError::DuplicateId {
            scope: format!("{} of workflow '{}'", kind, self.id),
            id: id.to_string(),
        }
    }

    pub fn input(&self, uuid: NodeId) -> Option<&InputNode> {
        self.inputs.get(&uuid)
    }

    pub fn step(&self, uuid: NodeId) -> Option<&StepNode> {
        self.steps.get(&uuid)
    }

    pub fn step_mut(&mut self, uuid: NodeId) -> Option<&mut StepNode> {
        self.steps.get_mut(&uuid)
    }

    pub fn output(&self, uuid: NodeId) -> Option<&OutputNode> {
        self.outputs.get(&uuid)
    }

    /// Finds a step by display id.
    pub fn find_step(&self, id: &str) -> Option<&StepNode> {
        self.steps.values().find(|s| s.id == id)
    }

    pub fn find_input(&self, id: &str) -> Option<&InputNode> {
        self.inputs.values().find(|i| i.id == id)
    }

    pub fn find_output(&self, id: &str) -> Option<&OutputNode> {
        self.outputs.values().find(|o| o.id == id)
    }

    /// Inputs in deterministic (id, uuid) order.
    pub fn sorted_inputs(&self) -> Vec<&InputNode> {
        let mut nodes: Vec<&InputNode> = self.inputs.values().collect();
        nodes.sort_by(|a, b| (&a.id, a.uuid).cmp(&(&b.id, b.uuid)));
        nodes
    }

    /// Steps in deterministic (id, uuid) order.
    pub fn sorted_steps(&self) -> Vec<&StepNode> {
        let mut nodes: Vec<&StepNode> = self.steps.values().collect();
        nodes.sort_by(|a, b| (&a.id, a.uuid).cmp(&(&b.id, b.uuid)));
        nodes
    }

    /// Outputs in deterministic (id, uuid) order.
    pub fn sorted_outputs(&self) -> Vec<&OutputNode> {
        let mut nodes: Vec<&OutputNode> = self.outputs.values().collect();
        nodes.sort_by(|a, b| (&a.id, a.uuid).cmp(&(&b.id, b.uuid)));
        nodes
    }

    /// Step UUIDs in deterministic (id, uuid) order.
    pub fn sorted_step_ids(&self) -> Vec<NodeId> {
        self.sorted_steps().into_iter().map(|s| s.uuid).collect()
    }

    /// Number of steps in this scope (not counting subworkflows).
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every workflow in the tree, this one first, depth-first in step
    /// order. A subworkflow used by several steps appears once per step.
    pub fn scopes(&self) -> Vec<&Workflow> {
        let mut found = vec![self];
        for step in self.sorted_steps() {
            if let Some(sub) = step.tool.as_workflow() {
                found.extend(sub.scopes());
            }
        }
        found
    }

    /// Applies `f` to this workflow and every nested workflow, children
    /// first.
    pub fn for_each_scope_mut(&mut self, f: &mut impl FnMut(&mut Workflow)) {
        for step in self.steps.values_mut() {
            if let Some(sub) = step.tool.as_workflow_mut() {
                sub.for_each_scope_mut(f);
            }
        }
        f(self);
    }
}

/// Serializes a UUID-keyed node map as a plain list of nodes.
mod node_map {
    use indexmap::IndexMap;
    use serde::de::Deserializer;
    use serde::ser::Serializer;
    use serde::{Deserialize, Serialize};

    use super::{InputNode, NodeId, OutputNode, StepNode};

    pub trait Keyed {
        fn key(&self) -> NodeId;
    }

    impl Keyed for InputNode {
        fn key(&self) -> NodeId {
            self.uuid
        }
    }

    impl Keyed for StepNode {
        fn key(&self) -> NodeId {
            self.uuid
        }
    }

    impl Keyed for OutputNode {
        fn key(&self) -> NodeId {
            self.uuid
        }
    }

    pub fn serialize<T, S>(map: &IndexMap<NodeId, T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.values())
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<IndexMap<NodeId, T>, D::Error>
    where
        T: Deserialize<'de> + Keyed,
        D: Deserializer<'de>,
    {
        let nodes = Vec::<T>::deserialize(deserializer)?;
        Ok(nodes.into_iter().map(|node| (node.key(), node)).collect())
    }
}
