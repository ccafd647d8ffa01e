//! Expression Model
//!
//! Value-producing trees attached to step sources, output selectors,
//! conditions and defaults. Selectors hold the UUID of the node they read
//! plus its last known display id; only the display id is ever rewritten.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::NodeId;

/// A UUID-keyed pointer at another node, with its printable id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub uuid: NodeId,
    pub id: String,
}

impl Reference {
    pub fn new(uuid: NodeId, id: impl Into<String>) -> Self {
        Self {
            uuid,
            id: id.into(),
        }
    }
}

/// An expression tree.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expression {
    /// A constant value
    Literal { value: Value },

    /// The value of a workflow input
    InputRef { target: Reference },

    /// The value of an input of the enclosing tool
    ToolInputRef { target: Reference },

    /// One output of another step
    StepOutputRef { step: Reference, output: String },

    /// An opaque operator applied to sub-expressions
    Operator { op: String, args: Vec<Expression> },

    /// A format string with named sub-expressions
    Template {
        format: String,
        args: BTreeMap<String, Expression>,
    },

    /// A generated file name
    Filename {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<Box<Expression>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suffix: Option<Box<Expression>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extension: Option<String>,
    },
}

/// A selector leaf found while walking an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leaf<'a> {
    Input(&'a Reference),
    ToolInput(&'a Reference),
    StepOutput(&'a Reference, &'a str),
}

impl Expression {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    pub fn operator(op: impl Into<String>, args: Vec<Expression>) -> Self {
        Self::Operator {
            op: op.into(),
            args,
        }
    }

    pub fn template(format: impl Into<String>, args: Vec<(&str, Expression)>) -> Self {
        Self::Template {
            format: format.into(),
            args: args
                .into_iter()
                .map(|(name, expr)| (name.to_string(), expr))
                .collect(),
        }
    }

    pub fn filename(
        prefix: Option<Expression>,
        suffix: Option<Expression>,
        extension: Option<&str>,
    ) -> Self {
        Self::Filename {
            prefix: prefix.map(Box::new),
            suffix: suffix.map(Box::new),
            extension: extension.map(str::to_string),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal { .. })
    }

    /// Direct children of this node.
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Self::Literal { .. }
            | Self::InputRef { .. }
            | Self::ToolInputRef { .. }
            | Self::StepOutputRef { .. } => Vec::new(),
            Self::Operator { args, .. } => args.iter().collect(),
            Self::Template { args, .. } => args.values().collect(),
            Self::Filename { prefix, suffix, .. } => {
                prefix.iter().chain(suffix.iter()).map(|b| b.as_ref()).collect()
            }
        }
    }

    /// Every selector leaf, at any depth, in tree order.
    pub fn leaves(&self) -> Vec<Leaf<'_>> {
        let mut found = Vec::new();
        self.collect_leaves(&mut found);
        found
    }

    fn collect_leaves<'a>(&'a self, found: &mut Vec<Leaf<'a>>) {
        match self {
            Self::InputRef { target } => found.push(Leaf::Input(target)),
            Self::ToolInputRef { target } => found.push(Leaf::ToolInput(target)),
            Self::StepOutputRef { step, output } => {
                found.push(Leaf::StepOutput(step, output.as_str()))
            }
            Self::Literal { .. }
            | Self::Operator { .. }
            | Self::Template { .. }
            | Self::Filename { .. } => {
                for child in self.children() {
                    child.collect_leaves(found);
                }
            }
        }
    }

    /// UUIDs of tool inputs this expression reads.
    pub fn tool_inputs(&self) -> BTreeSet<NodeId> {
        self.leaves()
            .into_iter()
            .filter_map(|leaf| match leaf {
                Leaf::ToolInput(target) => Some(target.uuid),
                Leaf::Input(_) | Leaf::StepOutput(..) => None,
            })
            .collect()
    }

    /// Applies `f` to every node of the tree, parents before children.
    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut Expression)) {
        f(self);
        match self {
            Self::Literal { .. }
            | Self::InputRef { .. }
            | Self::ToolInputRef { .. }
            | Self::StepOutputRef { .. } => {}
            Self::Operator { args, .. } => {
                for arg in args {
                    arg.visit_mut(f);
                }
            }
            Self::Template { args, .. } => {
                for arg in args.values_mut() {
                    arg.visit_mut(f);
                }
            }
            Self::Filename { prefix, suffix, .. } => {
                for part in prefix.iter_mut().chain(suffix.iter_mut()) {
                    part.visit_mut(f);
                }
            }
        }
    }

    /// Stable textual key, used to compare sources for equality.
    pub fn canonical_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}
