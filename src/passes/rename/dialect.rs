//! Dialect Naming Rules
//!
//! Case conventions and reserved words of each target dialect.

use std::collections::{HashMap, HashSet};
use std::fmt;

use once_cell::sync::Lazy;

use super::case::CaseStyle;
use crate::config::Dialect;

/// The kinds of entity that carry a display id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Workflow,
    Tool,
    Step,
    Input,
    Output,
}

impl EntityKind {
    /// Word added when an id must be altered.
    pub fn affix(&self) -> &'static str {
        match self {
            EntityKind::Workflow => "wf",
            EntityKind::Tool => "tool",
            EntityKind::Step => "step",
            EntityKind::Input => "in",
            EntityKind::Output => "out",
        }
    }

    /// Inputs and outputs take their affix in front, everything else
    /// behind.
    pub fn affix_is_prefix(&self) -> bool {
        matches!(self, EntityKind::Input | EntityKind::Output)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Workflow => "workflow",
            EntityKind::Tool => "tool",
            EntityKind::Step => "step",
            EntityKind::Input => "input",
            EntityKind::Output => "output",
        };
        write!(f, "{}", name)
    }
}

static CASE_TABLE: Lazy<HashMap<(Dialect, EntityKind), CaseStyle>> = Lazy::new(|| {
    use CaseStyle::*;
    use EntityKind::*;

    let mut table = HashMap::new();
    for kind in [Workflow, Tool, Step, Input, Output] {
        table.insert((Dialect::Cwl, kind), SnakeLower);
    }

    table.insert((Dialect::Wdl, Workflow), Pascal);
    table.insert((Dialect::Wdl, Tool), Pascal);
    table.insert((Dialect::Wdl, Step), SnakeLower);
    table.insert((Dialect::Wdl, Input), Camel);
    table.insert((Dialect::Wdl, Output), Camel);

    table.insert((Dialect::Nextflow, Workflow), SnakeUpper);
    table.insert((Dialect::Nextflow, Tool), SnakeUpper);
    table.insert((Dialect::Nextflow, Step), SnakeLower);
    table.insert((Dialect::Nextflow, Input), SnakeLower);
    table.insert((Dialect::Nextflow, Output), SnakeLower);
    table
});

const CWL_RESERVED: &[&str] = &[
    "arguments", "basecommand", "class", "cwlversion", "default", "doc", "expression", "format",
    "hints", "id", "in", "inputbinding", "inputs", "label", "out", "outputbinding", "outputs",
    "requirements", "run", "runtime", "scatter", "scattermethod", "secondaryfiles", "self",
    "stderr", "stdin", "stdout", "steps", "streamable", "type", "when",
];

const WDL_RESERVED: &[&str] = &[
    "after", "alias", "array", "as", "boolean", "call", "command", "directory", "else", "false",
    "file", "float", "hints", "if", "import", "in", "input", "int", "left", "map", "meta", "none",
    "object", "output", "pair", "parameter_meta", "requirements", "right", "runtime", "scatter",
    "string", "struct", "task", "then", "true", "version", "workflow",
];

const NEXTFLOW_RESERVED: &[&str] = &[
    "abstract", "as", "assert", "boolean", "break", "byte", "case", "catch", "channel", "char",
    "class", "const", "container", "continue", "cpus", "def", "default", "disk", "do", "double",
    "each", "else", "emit", "enum", "env", "exec", "extends", "false", "file", "final",
    "finally", "float", "for", "from", "goto", "if", "implements", "import", "in", "include",
    "input", "instanceof", "int", "interface", "label", "long", "main", "memory", "native",
    "new", "null", "output", "package", "params", "path", "private", "process", "protected",
    "public", "publishdir", "return", "script", "shell", "short", "static", "stdin", "stdout",
    "strictfp", "stub", "super", "switch", "synchronized", "tag", "take", "task", "this",
    "throw", "throws", "time", "transient", "true", "try", "tuple", "val", "void", "volatile",
    "when", "while", "workflow",
];

static RESERVED: Lazy<HashMap<Dialect, HashSet<&'static str>>> = Lazy::new(|| {
    let mut sets = HashMap::new();
    sets.insert(Dialect::Cwl, CWL_RESERVED.iter().copied().collect());
    sets.insert(Dialect::Wdl, WDL_RESERVED.iter().copied().collect());
    sets.insert(Dialect::Nextflow, NEXTFLOW_RESERVED.iter().copied().collect());
    sets
});

/// Case style for one kind of entity in one dialect.
pub fn case_style(dialect: Dialect, kind: EntityKind) -> CaseStyle {
    CASE_TABLE
        .get(&(dialect, kind))
        .copied()
        .unwrap_or(CaseStyle::SnakeLower)
}

/// True if `id` is a reserved word of `dialect`, ignoring case.
pub fn is_reserved(dialect: Dialect, id: &str) -> bool {
    RESERVED
        .get(&dialect)
        .map(|words| words.contains(id.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Word that `Filename`-typed inputs must end with, if the dialect
/// distinguishes them.
pub fn filename_marker(dialect: Dialect) -> Option<&'static str> {
    match dialect {
        Dialect::Wdl => Some("path"),
        Dialect::Cwl | Dialect::Nextflow => None,
    }
}
