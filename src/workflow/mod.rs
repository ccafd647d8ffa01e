//! Workflow Representation Module
//!
//! The intermediate representation every source dialect is ingested into
//! and every target dialect is generated from.
//!
//! # Structure
//!
//! - [`types`]: Parameter data types and secondary-file signatures
//! - [`expression`]: Expression trees and UUID-keyed selectors
//! - [`tool`]: Command, code and workflow tools
//! - [`model`]: Workflow scopes and their input, step and output nodes
//! - [`connections`]: Selector resolution and producer/consumer facts
//! - [`planner`]: Step dependency graph and topological order
//! - [`validator`]: Structural invariant checks
//! - [`parser`]: JSON/YAML loading and saving

pub mod connections;
pub mod expression;
pub mod model;
pub mod parser;
pub mod planner;
pub mod tool;
pub mod types;
pub mod validator;

pub use connections::{gather_connections, resolve, Connection, Endpoint, Origin, TypeSlot};
pub use expression::{Expression, Leaf, Reference};
pub use model::{InputNode, NodeId, OutputNode, Scatter, ScatterMethod, StepNode, Workflow};
pub use parser::{load_workflow, save_workflow};
pub use planner::{build_step_graph, topological_order, StepGraph};
pub use tool::{CodeTool, CommandTool, Port, Tool, ToolArgument, ToolInput, ToolOutput};
pub use types::{DataType, FileType, Signature, TypeKind};
pub use validator::{quick_validate, validate_workflow};
