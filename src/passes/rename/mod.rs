//! Identifier Renaming
//!
//! Rewrites every display id in the tree so it is legal in the target
//! dialect, then repairs every selector, `sources` key and scatter field
//! to match. Runs in two phases:
//! - Planning, bottom-up: each scope's inputs, then steps (their tools
//!   first, once per tool UUID), then outputs; a scope's own id last
//! - Applying, top-down: ids and every reference rewritten from the plan
//!
//! Within a scope the later-processed entity yields on a collision, so
//! inputs keep their names over steps and outputs. Tool ids share one
//! namespace across the whole tree.

pub mod case;
pub mod dialect;

use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, info};

use crate::config::Dialect;
use crate::error::{Result, TranslateError};
use crate::workflow::{DataType, Expression, NodeId, Port, Reference, Tool, Workflow};

pub use case::{join_words, split_words, CaseStyle};
pub use dialect::{case_style, filename_marker, is_reserved, EntityKind};

use case::has_repeated_chunk;

/// Highest trailing integer tried before giving up.
const MAX_NUMERIC_SUFFIX: usize = 1000;

/// One planned rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renamed {
    pub kind: EntityKind,
    pub old: String,
    pub new: String,
}

/// UUID -> (old id, new id) for every entity seen by one renaming run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameTable {
    entries: BTreeMap<NodeId, Renamed>,
}

impl RenameTable {
    pub fn get(&self, uuid: NodeId) -> Option<&Renamed> {
        self.entries.get(&uuid)
    }

    /// The new display id planned for `uuid`.
    pub fn new_id(&self, uuid: NodeId) -> Option<&str> {
        self.entries.get(&uuid).map(|r| r.new.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Renamed)> {
        self.entries.iter()
    }

    /// Entries whose id actually changed.
    pub fn changed(&self) -> impl Iterator<Item = (&NodeId, &Renamed)> {
        self.entries.iter().filter(|(_, r)| r.old != r.new)
    }

    fn record(&mut self, uuid: NodeId, kind: EntityKind, old: &str, new: String) {
        if old != new {
            debug!("Renaming {} '{}' -> '{}'", kind, old, new);
        }
        self.entries.insert(
            uuid,
            Renamed {
                kind,
                old: old.to_string(),
                new,
            },
        );
    }
}

/// Renames every id in the tree for `dialect` and repairs all references.
pub fn rename(workflow: &mut Workflow, dialect: Dialect) -> Result<RenameTable> {
    info!("Renaming identifiers in '{}' for {}", workflow.id, dialect);

    let mut planner = Planner::new(dialect);
    planner.plan_scope(workflow)?;
    planner.assign_tool_id(EntityKind::Workflow, workflow.uuid, &workflow.id)?;
    let table = planner.table;

    apply_scope(workflow, &table);

    info!(
        "Renaming complete: {} ids examined, {} changed",
        table.len(),
        table.changed().count()
    );
    Ok(table)
}

struct Planner {
    dialect: Dialect,
    table: RenameTable,
    planned_tools: HashSet<NodeId>,
    tool_ids: HashSet<String>,
}

impl Planner {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            table: RenameTable::default(),
            planned_tools: HashSet::new(),
            tool_ids: HashSet::new(),
        }
    }

    fn plan_scope(&mut self, scope: &Workflow) -> Result<()> {
        let mut taken = HashSet::new();

        for input in scope.sorted_inputs() {
            self.plan_entity(
                EntityKind::Input,
                input.uuid,
                &input.id,
                Some(&input.datatype),
                &mut taken,
            )?;
        }
        for step in scope.sorted_steps() {
            self.plan_tool(&step.tool)?;
            self.plan_entity(EntityKind::Step, step.uuid, &step.id, None, &mut taken)?;
        }
        for output in scope.sorted_outputs() {
            self.plan_entity(
                EntityKind::Output,
                output.uuid,
                &output.id,
                Some(&output.datatype),
                &mut taken,
            )?;
        }
        Ok(())
    }

    fn plan_tool(&mut self, tool: &Tool) -> Result<()> {
        if !self.planned_tools.insert(tool.uuid()) {
            return Ok(());
        }

        let kind = match tool {
            Tool::Workflow(sub) => {
                self.plan_scope(sub)?;
                EntityKind::Workflow
            }
            Tool::Command(_) | Tool::Code(_) => {
                let mut taken = HashSet::new();
                for port in sorted_ports(tool.input_ports()) {
                    self.plan_entity(EntityKind::Input, port.uuid, port.id, Some(port.datatype), &mut taken)?;
                }
                for port in sorted_ports(tool.output_ports()) {
                    self.plan_entity(EntityKind::Output, port.uuid, port.id, Some(port.datatype), &mut taken)?;
                }
                EntityKind::Tool
            }
        };

        self.assign_tool_id(kind, tool.uuid(), tool.id())
    }

    fn assign_tool_id(&mut self, kind: EntityKind, uuid: NodeId, id: &str) -> Result<()> {
        let new = self.legal_id(kind, uuid, id, None, &self.tool_ids)?;
        self.tool_ids.insert(new.clone());
        self.table.record(uuid, kind, id, new);
        Ok(())
    }

    fn plan_entity(
        &mut self,
        kind: EntityKind,
        uuid: NodeId,
        id: &str,
        datatype: Option<&DataType>,
        taken: &mut HashSet<String>,
    ) -> Result<()> {
        let new = self.legal_id(kind, uuid, id, datatype, taken)?;
        taken.insert(new.clone());
        self.table.record(uuid, kind, id, new);
        Ok(())
    }

    /// Formats `id` for the dialect and, if the result is reserved or
    /// already taken, tries the alteration strategies in order: entity
    /// affix, datatype name, trailing integer.
    fn legal_id(
        &self,
        kind: EntityKind,
        uuid: NodeId,
        id: &str,
        datatype: Option<&DataType>,
        taken: &HashSet<String>,
    ) -> Result<String> {
        let style = case_style(self.dialect, kind);

        let mut words = split_words(id);
        if words.is_empty() {
            words.push(kind.affix().to_string());
        }
        // ids must start with a letter
        if words[0].starts_with(|c: char| c.is_ascii_digit()) {
            words.insert(0, kind.affix().to_string());
        }
        if let (Some(marker), Some(datatype)) = (filename_marker(self.dialect), datatype) {
            let marked = words.last().map(String::as_str) == Some(marker);
            if kind == EntityKind::Input && datatype.is_filename() && !marked {
                words.push(marker.to_string());
            }
        }

        let primary = join_words(&words, style);
        let is_free = |candidate: &str| !is_reserved(self.dialect, candidate) && !taken.contains(candidate);
        if is_free(&primary) {
            return Ok(primary);
        }

        let base_repeats = has_repeated_chunk(&primary);
        let acceptable =
            |candidate: &str| is_free(candidate) && (base_repeats || !has_repeated_chunk(candidate));

        let mut affixed = words.clone();
        if kind.affix_is_prefix() {
            affixed.insert(0, kind.affix().to_string());
        } else {
            affixed.push(kind.affix().to_string());
        }
        let candidate = join_words(&affixed, style);
        if acceptable(&candidate) {
            return Ok(candidate);
        }

        if let Some(datatype) = datatype {
            let mut typed = words.clone();
            typed.extend(split_words(&datatype.type_name()));
            let candidate = join_words(&typed, style);
            if acceptable(&candidate) {
                return Ok(candidate);
            }
        }

        for n in 2..=MAX_NUMERIC_SUFFIX {
            let mut numbered = words.clone();
            numbered.push(n.to_string());
            let candidate = join_words(&numbered, style);
            if acceptable(&candidate) {
                return Ok(candidate);
            }
        }

        Err(TranslateError::SymbolAlterationExhausted {
            node: id.to_string(),
            uuid,
            dialect: self.dialect.to_string(),
            reason: format!(
                "'{}' is reserved or already used by a sibling {}, and every alternative was too",
                primary, kind
            ),
        })
    }
}

fn sorted_ports(mut ports: Vec<Port<'_>>) -> Vec<Port<'_>> {
    ports.sort_by(|a, b| (a.id, a.uuid).cmp(&(b.id, b.uuid)));
    ports
}

/// Old port id -> new port id, for ports the table knows.
fn port_map(ports: &[Port<'_>], table: &RenameTable) -> HashMap<String, String> {
    ports
        .iter()
        .filter_map(|port| {
            table
                .new_id(port.uuid)
                .map(|new| (port.id.to_string(), new.to_string()))
        })
        .collect()
}

fn rename_id(id: &mut String, uuid: NodeId, table: &RenameTable) {
    if let Some(new) = table.new_id(uuid) {
        *id = new.to_string();
    }
}

fn rename_reference(target: &mut Reference, table: &RenameTable) {
    rename_id(&mut target.id, target.uuid, table);
}

/// Rewrites every selector in `expr`. `output_tags` maps a step UUID to
/// its tool's old -> new output ids.
fn rewrite_expression(
    expr: &mut Expression,
    table: &RenameTable,
    output_tags: &HashMap<NodeId, HashMap<String, String>>,
) {
    expr.visit_mut(&mut |node| match node {
        Expression::InputRef { target } | Expression::ToolInputRef { target } => {
            rename_reference(target, table)
        }
        Expression::StepOutputRef { step, output } => {
            rename_reference(step, table);
            let renamed = output_tags
                .get(&step.uuid)
                .and_then(|tags| tags.get(output.as_str()));
            if let Some(new) = renamed {
                *output = new.clone();
            }
        }
        Expression::Literal { .. }
        | Expression::Operator { .. }
        | Expression::Template { .. }
        | Expression::Filename { .. } => {}
    });
}

fn apply_scope(scope: &mut Workflow, table: &RenameTable) {
    rename_id(&mut scope.id, scope.uuid, table);

    // taken before any tool is renamed, while tags still hold old ids
    let output_tags: HashMap<NodeId, HashMap<String, String>> = scope
        .steps
        .values()
        .map(|step| (step.uuid, port_map(&step.tool.output_ports(), table)))
        .collect();
    let rewrite = |expr: &mut Expression| rewrite_expression(expr, table, &output_tags);

    for input in scope.inputs.values_mut() {
        rename_id(&mut input.id, input.uuid, table);
        if let Some(default) = &mut input.default {
            rewrite(default);
        }
    }

    for step in scope.steps.values_mut() {
        rename_id(&mut step.id, step.uuid, table);

        let ports = port_map(&step.tool.input_ports(), table);
        step.sources = std::mem::take(&mut step.sources)
            .into_iter()
            .map(|(port, mut source)| {
                rewrite(&mut source);
                (ports.get(&port).cloned().unwrap_or(port), source)
            })
            .collect();
        if let Some(scatter) = &mut step.scatter {
            scatter.fields = std::mem::take(&mut scatter.fields)
                .into_iter()
                .map(|field| ports.get(&field).cloned().unwrap_or(field))
                .collect();
        }
        for expr in step.when.iter_mut().chain(step.foreach.iter_mut()) {
            rewrite(expr);
        }

        apply_tool(&mut step.tool, table);
    }

    for output in scope.outputs.values_mut() {
        rename_id(&mut output.id, output.uuid, table);
        rewrite(&mut output.source);
    }
}

fn apply_tool(tool: &mut Tool, table: &RenameTable) {
    let no_steps = HashMap::new();
    match tool {
        Tool::Workflow(sub) => apply_scope(sub, table),
        Tool::Command(command) => {
            rename_id(&mut command.id, command.uuid, table);
            for input in &mut command.inputs {
                rename_id(&mut input.id, input.uuid, table);
                if let Some(default) = &mut input.default {
                    rewrite_expression(default, table, &no_steps);
                }
            }
            for output in &mut command.outputs {
                rename_id(&mut output.id, output.uuid, table);
                if let Some(selector) = &mut output.selector {
                    rewrite_expression(selector, table, &no_steps);
                }
            }
            for argument in &mut command.arguments {
                rewrite_expression(&mut argument.value, table, &no_steps);
            }
        }
        Tool::Code(code) => {
            rename_id(&mut code.id, code.uuid, table);
            for input in &mut code.inputs {
                rename_id(&mut input.id, input.uuid, table);
                if let Some(default) = &mut input.default {
                    rewrite_expression(default, table, &no_steps);
                }
            }
            for output in &mut code.outputs {
                rename_id(&mut output.id, output.uuid, table);
                if let Some(selector) = &mut output.selector {
                    rewrite_expression(selector, table, &no_steps);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{
        validate_workflow, CommandTool, InputNode, Leaf, OutputNode, ScatterMethod, StepNode,
        ToolArgument, ToolInput, ToolOutput,
    };

    /// Every reference in the tree as (target uuid, printed id).
    fn references(workflow: &Workflow) -> Vec<(NodeId, String)> {
        let mut found = Vec::new();
        for scope in workflow.scopes() {
            let mut exprs: Vec<&Expression> = Vec::new();
            for input in scope.sorted_inputs() {
                exprs.extend(input.default.iter());
            }
            for step in scope.sorted_steps() {
                exprs.extend(step.expressions());
                if let Tool::Command(tool) = &step.tool {
                    exprs.extend(tool.arguments.iter().map(|a| &a.value));
                    exprs.extend(tool.outputs.iter().filter_map(|o| o.selector.as_ref()));
                }
            }
            for output in scope.sorted_outputs() {
                exprs.push(&output.source);
            }
            for expr in exprs {
                for leaf in expr.leaves() {
                    let target = match leaf {
                        Leaf::Input(t) | Leaf::ToolInput(t) | Leaf::StepOutput(t, _) => t,
                    };
                    found.push((target.uuid, target.id.clone()));
                }
            }
        }
        found
    }

    fn assert_legal(workflow: &Workflow, dialect: Dialect) {
        for scope in workflow.scopes() {
            let mut ids: Vec<&str> = Vec::new();
            ids.extend(scope.inputs.values().map(|n| n.id.as_str()));
            ids.extend(scope.steps.values().map(|n| n.id.as_str()));
            ids.extend(scope.outputs.values().map(|n| n.id.as_str()));
            let unique: HashSet<&str> = ids.iter().copied().collect();
            assert_eq!(unique.len(), ids.len(), "duplicate ids in {:?}", ids);

            for id in ids.iter().copied().chain([scope.id.as_str()]) {
                assert!(!is_reserved(dialect, id), "'{}' is reserved", id);
            }
            for step in scope.steps.values() {
                let ports: Vec<&str> = step.tool.input_ports().iter().map(|p| p.id).collect();
                for port in &ports {
                    assert!(!is_reserved(dialect, port), "'{}' is reserved", port);
                }
                assert!(!is_reserved(dialect, step.tool.id()));
            }
        }
    }

    /// reads + input (reserved in WDL) -> align (outputs `out_bam`) -> output
    fn sample() -> Workflow {
        let tool = CommandTool::new("bwa-mem")
            .with_input(ToolInput::new("reads", DataType::file()))
            .with_input(ToolInput::new("input", DataType::int().into_optional()))
            .with_input(ToolInput::new("bam", DataType::filename()))
            .with_output(ToolOutput::new("out_bam", DataType::file()));

        let mut workflow = Workflow::new("align-sample");
        let reads = InputNode::new("reads", DataType::file());
        let input = InputNode::new("input", DataType::int());
        let (reads_ref, input_ref) = (reads.reference(), input.reference());
        workflow.add_input(reads).unwrap();
        workflow.add_input(input).unwrap();

        let step = StepNode::new("alignReads", Tool::Command(tool))
            .with_source("reads", reads_ref)
            .with_source("input", input_ref)
            .with_source("bam", Expression::literal("out.bam"))
            .with_scatter(&["reads"], ScatterMethod::Dot);
        let aligned = step.output("out_bam");
        workflow.add_step(step).unwrap();
        workflow
            .add_output(OutputNode::new("reads", DataType::file(), aligned))
            .unwrap();
        workflow
    }

    #[test]
    fn test_wdl_filename_input_gets_path_suffix() {
        let mut workflow = sample();
        rename(&mut workflow, Dialect::Wdl).unwrap();

        let step = workflow.find_step("align_reads").unwrap();
        assert!(step.tool.input_port("bamPath").is_some());
        assert!(step.sources.contains_key("bamPath"));
        assert!(!step.sources.contains_key("bam"));
    }

    #[test]
    fn test_cwl_does_not_mark_filenames() {
        let mut workflow = sample();
        rename(&mut workflow, Dialect::Cwl).unwrap();
        let step = workflow.find_step("align_reads").unwrap();
        assert!(step.tool.input_port("bam").is_some());
        assert_eq!(step.tool.id(), "bwa_mem");
    }

    #[test]
    fn test_reserved_ids_are_altered() {
        let mut workflow = sample();
        rename(&mut workflow, Dialect::Wdl).unwrap();

        assert!(workflow.find_input("inInput").is_some());
        let step = workflow.find_step("align_reads").unwrap();
        assert!(step.tool.input_port("inInput").is_some());
        assert_eq!(workflow.id, "AlignSample");
        assert_eq!(step.tool.id(), "BwaMem");
    }

    #[test]
    fn test_output_yields_to_input() {
        let mut workflow = sample();
        rename(&mut workflow, Dialect::Cwl).unwrap();

        assert!(workflow.find_input("reads").is_some());
        assert!(workflow.find_output("out_reads").is_some());
    }

    #[test]
    fn test_ids_are_legal_and_unique_for_every_dialect() {
        for dialect in [Dialect::Cwl, Dialect::Wdl, Dialect::Nextflow] {
            let mut workflow = sample();
            rename(&mut workflow, dialect).unwrap();
            assert_legal(&workflow, dialect);
            validate_workflow(&workflow).unwrap();
        }
    }

    #[test]
    fn test_references_keep_their_targets() {
        for dialect in [Dialect::Cwl, Dialect::Wdl, Dialect::Nextflow] {
            let mut workflow = sample();
            let before: Vec<NodeId> = references(&workflow).into_iter().map(|(uuid, _)| uuid).collect();

            let table = rename(&mut workflow, dialect).unwrap();

            let after = references(&workflow);
            let mut uuids: Vec<NodeId> = after.iter().map(|(uuid, _)| *uuid).collect();
            let mut expected = before.clone();
            uuids.sort();
            expected.sort();
            assert_eq!(uuids, expected);
            for (uuid, id) in after {
                assert_eq!(table.new_id(uuid), Some(id.as_str()));
            }
        }
    }

    #[test]
    fn test_step_output_tags_and_scatter_follow_renames() {
        let mut workflow = sample();
        rename(&mut workflow, Dialect::Wdl).unwrap();

        let output = workflow.outputs.values().next().unwrap();
        match &output.source {
            Expression::StepOutputRef { step, output } => {
                assert_eq!(step.id, "align_reads");
                assert_eq!(output, "outBam");
            }
            other => panic!("unexpected source {:?}", other),
        }
        let step = workflow.find_step("align_reads").unwrap();
        let fields: Vec<&str> = step.scatter.as_ref().unwrap().fields.iter().map(String::as_str).collect();
        assert_eq!(fields, vec!["reads"]);
    }

    #[test]
    fn test_colliding_steps_get_affix() {
        let tool = Tool::Command(CommandTool::new("sort"));
        let mut workflow = Workflow::new("main");
        workflow.add_step(StepNode::new("sortReads", tool.clone())).unwrap();
        workflow.add_step(StepNode::new("sort_reads", tool)).unwrap();

        rename(&mut workflow, Dialect::Cwl).unwrap();
        assert!(workflow.find_step("sort_reads").is_some());
        assert!(workflow.find_step("sort_reads_step").is_some());
    }

    #[test]
    fn test_shared_tool_renamed_once_and_distinct_tools_kept_apart() {
        let shared = Tool::Command(CommandTool::new("fastqc"));
        let other = Tool::Command(CommandTool::new("FASTQC"));
        let mut workflow = Workflow::new("qc");
        workflow.add_step(StepNode::new("a", shared.clone())).unwrap();
        workflow.add_step(StepNode::new("b", shared)).unwrap();
        workflow.add_step(StepNode::new("c", other)).unwrap();

        rename(&mut workflow, Dialect::Nextflow).unwrap();

        let a = workflow.find_step("a").unwrap().tool.id().to_string();
        let b = workflow.find_step("b").unwrap().tool.id().to_string();
        let c = workflow.find_step("c").unwrap().tool.id().to_string();
        assert_eq!(a, "FASTQC");
        assert_eq!(a, b);
        assert_eq!(c, "FASTQC_TOOL");
    }

    #[test]
    fn test_tool_arguments_follow_input_renames() {
        let threads = ToolInput::new("numThreads", DataType::int());
        let tool = CommandTool::new("bwa")
            .with_argument(ToolArgument::new(threads.reference()).with_prefix("-t"))
            .with_input(threads);
        let mut workflow = Workflow::new("main");
        workflow
            .add_step(StepNode::new("bwa", Tool::Command(tool)).with_source("numThreads", Expression::literal(4)))
            .unwrap();

        rename(&mut workflow, Dialect::Cwl).unwrap();

        let step = workflow.find_step("bwa").unwrap();
        assert!(step.sources.contains_key("num_threads"));
        match &step.tool {
            Tool::Command(tool) => match &tool.arguments[0].value {
                Expression::ToolInputRef { target } => assert_eq!(target.id, "num_threads"),
                other => panic!("unexpected argument {:?}", other),
            },
            other => panic!("unexpected tool {:?}", other),
        }
    }

    #[test]
    fn test_subworkflow_is_renamed_bottom_up() {
        let mut inner = Workflow::new("trim-and-align");
        let reads = InputNode::new("rawReads", DataType::file());
        let reads_ref = reads.reference();
        inner.add_input(reads).unwrap();
        inner
            .add_output(OutputNode::new("trimmedReads", DataType::file(), reads_ref))
            .unwrap();

        let mut outer = Workflow::new("main");
        let fastq = InputNode::new("fastq", DataType::file());
        let fastq_ref = fastq.reference();
        outer.add_input(fastq).unwrap();
        let step = StepNode::new("sub", Tool::Workflow(Box::new(inner))).with_source("rawReads", fastq_ref);
        let trimmed = step.output("trimmedReads");
        outer.add_step(step).unwrap();
        outer
            .add_output(OutputNode::new("trimmed", DataType::file(), trimmed))
            .unwrap();

        rename(&mut outer, Dialect::Cwl).unwrap();
        validate_workflow(&outer).unwrap();

        let step = outer.find_step("sub").unwrap();
        assert_eq!(step.tool.id(), "trim_and_align");
        assert!(step.sources.contains_key("raw_reads"));
        let sub = step.tool.as_workflow().unwrap();
        assert!(sub.find_output("trimmed_reads").is_some());
    }

    #[test]
    fn test_leading_digit_gets_affix() {
        let planner = Planner::new(Dialect::Cwl);
        let id = planner
            .legal_id(EntityKind::Step, NodeId::new(), "2nd_pass", None, &HashSet::new())
            .unwrap();
        assert_eq!(id, "step_2nd_pass");
    }

    #[test]
    fn test_datatype_suffix_skips_repeats() {
        let planner = Planner::new(Dialect::Cwl);
        let mut taken = HashSet::new();
        taken.insert("file".to_string());
        taken.insert("in_file".to_string());
        // "file_file" would repeat, so the integer strategy wins
        let id = planner
            .legal_id(EntityKind::Input, NodeId::new(), "file", Some(&DataType::file()), &taken)
            .unwrap();
        assert_eq!(id, "file_2");

        taken.insert("reads".to_string());
        taken.insert("in_reads".to_string());
        let id = planner
            .legal_id(EntityKind::Input, NodeId::new(), "reads", Some(&DataType::file()), &taken)
            .unwrap();
        assert_eq!(id, "reads_file");
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let planner = Planner::new(Dialect::Cwl);
        let mut taken: HashSet<String> = (2..=MAX_NUMERIC_SUFFIX).map(|n| format!("x_{}", n)).collect();
        taken.insert("x".to_string());
        taken.insert("x_step".to_string());

        let err = planner
            .legal_id(EntityKind::Step, NodeId::new(), "x", None, &taken)
            .unwrap_err();
        assert!(matches!(err, TranslateError::SymbolAlterationExhausted { .. }));
        assert!(err.to_string().contains("cwl"));
    }
}
