//! Tool Definitions
//!
//! A step runs a tool: a command-line tool, an inline code tool, or a
//! nested workflow. The same tool (by UUID) may be held by several steps,
//! each owning its own copy; passes keep those copies in lockstep.

use serde::{Deserialize, Serialize};

use super::expression::{Expression, Reference};
use super::model::{NodeId, Workflow};
use super::types::DataType;

/// A declared input of a command or code tool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolInput {
    #[serde(default)]
    pub uuid: NodeId,

    pub id: String,

    pub datatype: DataType,

    /// Value used when a call site supplies nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Expression>,

    /// Command-line position (opaque to the passes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,

    /// Command-line prefix such as `--threads` (opaque to the passes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl ToolInput {
    pub fn new(id: impl Into<String>, datatype: DataType) -> Self {
        Self {
            uuid: NodeId::new(),
            id: id.into(),
            datatype,
            default: None,
            position: None,
            prefix: None,
        }
    }

    pub fn with_default(mut self, default: Expression) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_position(mut self, position: i64) -> Self {
        self.position = Some(position);
        self
    }

    /// A selector reading this input from inside the tool.
    pub fn reference(&self) -> Expression {
        Expression::ToolInputRef {
            target: Reference::new(self.uuid, &self.id),
        }
    }

    /// True if a default is present and is not a literal null.
    pub fn has_default(&self) -> bool {
        match &self.default {
            Some(Expression::Literal { value }) => !value.is_null(),
            Some(_) => true,
            None => false,
        }
    }
}

/// A declared output of a command or code tool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolOutput {
    #[serde(default)]
    pub uuid: NodeId,

    pub id: String,

    pub datatype: DataType,

    /// How the output value is collected, e.g. a glob over an input name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Expression>,
}

impl ToolOutput {
    pub fn new(id: impl Into<String>, datatype: DataType) -> Self {
        Self {
            uuid: NodeId::new(),
            id: id.into(),
            datatype,
            selector: None,
        }
    }

    pub fn with_selector(mut self, selector: Expression) -> Self {
        self.selector = Some(selector);
        self
    }
}

/// A fixed command-line argument.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolArgument {
    pub value: Expression,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

impl ToolArgument {
    pub fn new(value: Expression) -> Self {
        Self {
            value,
            prefix: None,
            position: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// A bare literal flag such as `--verbose`, with no prefix of its own.
    pub fn is_bare_flag(&self) -> bool {
        match &self.value {
            Expression::Literal { value } if self.prefix.is_none() => value
                .as_str()
                .map(|text| text.starts_with('-'))
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// A command-line tool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CommandTool {
    #[serde(default)]
    pub uuid: NodeId,

    pub id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub base_command: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,

    #[serde(default)]
    pub inputs: Vec<ToolInput>,

    #[serde(default)]
    pub outputs: Vec<ToolOutput>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<ToolArgument>,
}

impl CommandTool {
    /// Creates a command tool.
    ///
    /// ```
    /// use wfbridge::workflow::{CommandTool, DataType, ToolInput, ToolOutput};
    ///
    /// let tool = CommandTool::new("samtools_index")
    ///     .with_base_command(&["samtools", "index"])
    ///     .with_input(ToolInput::new("bam", DataType::file()))
    ///     .with_output(ToolOutput::new("out", DataType::file_with(None, &[".bai"])));
    /// assert_eq!(tool.inputs.len(), 1);
    /// ```
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            uuid: NodeId::new(),
            id: id.into(),
            base_command: Vec::new(),
            container: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            arguments: Vec::new(),
        }
    }

    pub fn with_base_command(mut self, command: &[&str]) -> Self {
        self.base_command = command.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_input(mut self, input: ToolInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, output: ToolOutput) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_argument(mut self, argument: ToolArgument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn input(&self, id: &str) -> Option<&ToolInput> {
        self.inputs.iter().find(|i| i.id == id)
    }
}

/// A tool implemented as an inline script.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CodeTool {
    #[serde(default)]
    pub uuid: NodeId,

    pub id: String,

    #[serde(default)]
    pub language: String,

    #[serde(default)]
    pub code: String,

    #[serde(default)]
    pub inputs: Vec<ToolInput>,

    #[serde(default)]
    pub outputs: Vec<ToolOutput>,
}

impl CodeTool {
    pub fn new(id: impl Into<String>, language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            uuid: NodeId::new(),
            id: id.into(),
            language: language.into(),
            code: code.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_input(mut self, input: ToolInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, output: ToolOutput) -> Self {
        self.outputs.push(output);
        self
    }
}

/// Read-only view of one tool port, uniform across tool kinds.
#[derive(Debug, Clone, Copy)]
pub struct Port<'a> {
    pub uuid: NodeId,
    pub id: &'a str,
    pub datatype: &'a DataType,
    pub default: Option<&'a Expression>,
}

/// What a step runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum Tool {
    Command(CommandTool),
    Code(CodeTool),
    Workflow(Box<Workflow>),
}

impl Tool {
    pub fn id(&self) -> &str {
        match self {
            Self::Command(tool) => &tool.id,
            Self::Code(tool) => &tool.id,
            Self::Workflow(workflow) => &workflow.id,
        }
    }

    pub fn uuid(&self) -> NodeId {
        match self {
            Self::Command(tool) => tool.uuid,
            Self::Code(tool) => tool.uuid,
            Self::Workflow(workflow) => workflow.uuid,
        }
    }

    pub fn set_id(&mut self, id: String) {
        match self {
            Self::Command(tool) => tool.id = id,
            Self::Code(tool) => tool.id = id,
            Self::Workflow(workflow) => workflow.id = id,
        }
    }

    pub fn as_workflow(&self) -> Option<&Workflow> {
        match self {
            Self::Workflow(workflow) => Some(workflow),
            Self::Command(_) | Self::Code(_) => None,
        }
    }

    pub fn as_workflow_mut(&mut self) -> Option<&mut Workflow> {
        match self {
            Self::Workflow(workflow) => Some(workflow),
            Self::Command(_) | Self::Code(_) => None,
        }
    }

    /// Declared inputs. For a workflow these derive from its input nodes.
    pub fn input_ports(&self) -> Vec<Port<'_>> {
        match self {
            Self::Command(tool) => tool_input_ports(&tool.inputs),
            Self::Code(tool) => tool_input_ports(&tool.inputs),
            Self::Workflow(workflow) => workflow
                .sorted_inputs()
                .into_iter()
                .map(|node| Port {
                    uuid: node.uuid,
                    id: &node.id,
                    datatype: &node.datatype,
                    default: node.default.as_ref(),
                })
                .collect(),
        }
    }

    /// Declared outputs. For a workflow these derive from its output nodes.
    pub fn output_ports(&self) -> Vec<Port<'_>> {
        match self {
            Self::Command(tool) => tool_output_ports(&tool.outputs),
            Self::Code(tool) => tool_output_ports(&tool.outputs),
            Self::Workflow(workflow) => workflow
                .sorted_outputs()
                .into_iter()
                .map(|node| Port {
                    uuid: node.uuid,
                    id: &node.id,
                    datatype: &node.datatype,
                    default: None,
                })
                .collect(),
        }
    }

    pub fn input_port(&self, id: &str) -> Option<Port<'_>> {
        self.input_ports().into_iter().find(|port| port.id == id)
    }

    pub fn output_port(&self, id: &str) -> Option<Port<'_>> {
        self.output_ports().into_iter().find(|port| port.id == id)
    }

    /// Mutable type of the input port with this UUID.
    pub fn input_type_mut(&mut self, port: NodeId) -> Option<&mut DataType> {
        match self {
            Self::Command(tool) => find_input_type(&mut tool.inputs, port),
            Self::Code(tool) => find_input_type(&mut tool.inputs, port),
            Self::Workflow(workflow) => workflow.inputs.get_mut(&port).map(|n| &mut n.datatype),
        }
    }

    /// Mutable type of the output port with this UUID.
    pub fn output_type_mut(&mut self, port: NodeId) -> Option<&mut DataType> {
        match self {
            Self::Command(tool) => find_output_type(&mut tool.outputs, port),
            Self::Code(tool) => find_output_type(&mut tool.outputs, port),
            Self::Workflow(workflow) => workflow.outputs.get_mut(&port).map(|n| &mut n.datatype),
        }
    }
}

fn tool_input_ports(inputs: &[ToolInput]) -> Vec<Port<'_>> {
    inputs
        .iter()
        .map(|input| Port {
            uuid: input.uuid,
            id: &input.id,
            datatype: &input.datatype,
            default: input.default.as_ref(),
        })
        .collect()
}

fn tool_output_ports(outputs: &[ToolOutput]) -> Vec<Port<'_>> {
    outputs
        .iter()
        .map(|output| Port {
            uuid: output.uuid,
            id: &output.id,
            datatype: &output.datatype,
            default: None,
        })
        .collect()
}

fn find_input_type(inputs: &mut [ToolInput], port: NodeId) -> Option<&mut DataType> {
    inputs
        .iter_mut()
        .find(|input| input.uuid == port)
        .map(|input| &mut input.datatype)
}

fn find_output_type(outputs: &mut [ToolOutput], port: NodeId) -> Option<&mut DataType> {
    outputs
        .iter_mut()
        .find(|output| output.uuid == port)
        .map(|output| &mut output.datatype)
}
