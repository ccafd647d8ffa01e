//! Secondary File Reconciliation
//!
//! Ingesters guess which secondary files travel with each File value, and
//! producer and consumer of one connection often disagree. This pass
//! unifies the signatures of connected file types until every consumer
//! receives the secondary files it expects:
//! - Pick the producer of the first connection that needs work
//! - Collect every connection touching it, anywhere in the tree
//! - Resolve one file type for the group and write it into each slot
//! - Repeat, at most [`MAX_ITERATIONS`] times

use std::collections::{BTreeSet, HashSet};

use log::{debug, info, warn};

use crate::config::SubtypeDivergence;
use crate::error::{Result, TranslateError};
use crate::workflow::{
    gather_connections, Connection, DataType, FileType, Signature, TypeSlot, Workflow,
};

/// Upper bound on reconciliation rounds.
pub const MAX_ITERATIONS: usize = 10;

/// Summary of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Rounds that resolved or skipped a group
    pub iterations: usize,
    /// Type copies rewritten across the tree
    pub slots_updated: usize,
    /// Groups left alone because they name different file subtypes
    pub groups_preserved: usize,
}

/// Outcome of resolving one group of connections.
#[derive(Debug, Clone, PartialEq)]
enum Resolution {
    Adopt(FileType),
    Preserve,
}

/// Reconciles secondary-file signatures across the whole tree.
///
/// After a successful run every connection whose producer was not
/// preserved delivers every secondary file its consumer expects, and a
/// consumer declaring none has adopted the one signature all of its
/// producers agree on. A second run changes nothing.
pub fn reconcile(workflow: &mut Workflow, policy: SubtypeDivergence) -> Result<ReconcileReport> {
    info!("Reconciling secondary files in '{}'", workflow.id);

    let mut report = ReconcileReport::default();
    let mut settled: HashSet<TypeSlot> = HashSet::new();

    let mut iteration = 0;
    loop {
        let connections = gather_connections(workflow)?;
        let central = connections
            .iter()
            .filter(|c| !settled.contains(&c.producer.slot))
            .find(|c| needs_work(c, &connections));

        let Some(central) = central else {
            report.iterations = iteration;
            info!(
                "Reconciliation reached a fixpoint after {} rounds ({} types updated, {} groups preserved)",
                report.iterations, report.slots_updated, report.groups_preserved
            );
            return Ok(report);
        };

        if iteration == MAX_ITERATIONS {
            return Err(TranslateError::ReconciliationDiverged {
                node: display_node(central),
                uuid: central.producer.node,
                iterations: MAX_ITERATIONS,
            });
        }

        // a bare consumer fed by disagreeing producers must stay generic
        let slot = central.producer.slot;
        let group: Vec<&Connection> = connections
            .iter()
            .filter(|c| c.touches(slot))
            .filter(|c| !c.has_bare_consumer() || needs_work(c, &connections))
            .collect();
        debug!(
            "Round {}: central node '{}' in '{}', {} connections",
            iteration + 1,
            central.producer.label,
            central.producer.scope,
            group.len()
        );

        match resolve_group(central, &group, policy)? {
            Resolution::Preserve => {
                warn!(
                    "Leaving types around '{}' unchanged: connected file subtypes differ",
                    central.producer.label
                );
                settled.insert(slot);
                report.groups_preserved += 1;
            }
            Resolution::Adopt(file) => {
                let slots: BTreeSet<TypeSlot> = group
                    .iter()
                    .flat_map(|c| [c.producer.slot, c.consumer.slot])
                    .collect();
                let updated = apply_file_type(workflow, &slots, &file);
                debug!(
                    "Adopted {} for {} slots ({} copies updated)",
                    file.signature(),
                    slots.len(),
                    updated
                );
                report.slots_updated += updated;
            }
        }
        iteration += 1;
    }
}

/// A connection needs work if its consumer expects secondary files the
/// producer lacks, or if its consumer declares none while every producer
/// feeding that consumer agrees on one non-empty signature.
fn needs_work(connection: &Connection, connections: &[Connection]) -> bool {
    if connection.is_unsatisfied() {
        return true;
    }
    if !connection.has_bare_consumer() {
        return false;
    }

    let produced = connection.producer.datatype.signature();
    connections
        .iter()
        .filter(|c| c.consumer.slot == connection.consumer.slot)
        .all(|c| c.producer.datatype.signature() == produced)
}

/// Builds the signature register of a group and picks the file type every
/// member should carry.
fn resolve_group(
    central: &Connection,
    group: &[&Connection],
    policy: SubtypeDivergence,
) -> Result<Resolution> {
    let members: Vec<&FileType> = group
        .iter()
        .flat_map(|c| [&c.producer.datatype, &c.consumer.datatype])
        .filter_map(|datatype| datatype.file_type())
        .collect();

    let subtypes: BTreeSet<&str> = members.iter().filter_map(|f| f.name.as_deref()).collect();
    if subtypes.len() > 1 && policy == SubtypeDivergence::Preserve {
        return Ok(Resolution::Preserve);
    }

    let signatures: BTreeSet<Signature> = members
        .iter()
        .map(|f| f.signature())
        .filter(|s| !s.is_empty())
        .collect();

    let adopted = match signatures.len() {
        1 => signatures.into_iter().next(),
        2 => {
            let mut pair = signatures.into_iter();
            match (pair.next(), pair.next()) {
                (Some(a), Some(b)) if a.is_strict_superset(&b) => Some(a),
                (Some(a), Some(b)) if b.is_strict_superset(&a) => Some(b),
                (Some(a), Some(b)) => {
                    return Err(reconciliation_error(
                        central,
                        format!("signatures {} and {} are incompatible", a, b),
                    ))
                }
                _ => None,
            }
        }
        0 => None,
        n => {
            return Err(reconciliation_error(
                central,
                format!("{} distinct secondary file signatures meet here", n),
            ))
        }
    };

    let Some(adopted) = adopted else {
        return Err(reconciliation_error(
            central,
            "no secondary file signature to adopt".to_string(),
        ));
    };

    // prefer a named subtype as the concrete representative
    let representative = members
        .iter()
        .filter(|f| f.signature() == adopted)
        .min_by_key(|f| f.is_generic())
        .map(|f| (*f).clone())
        .unwrap_or_default();

    Ok(Resolution::Adopt(representative))
}

fn display_node(central: &Connection) -> String {
    format!("{} (in '{}')", central.producer.label, central.producer.scope)
}

fn reconciliation_error(central: &Connection, reason: String) -> TranslateError {
    TranslateError::SecondaryTypeReconciliation {
        node: display_node(central),
        uuid: central.producer.node,
        reason,
    }
}

/// Writes `file` into every copy of every slot whose signature differs
/// from it. Returns the number of copies changed.
fn apply_file_type(workflow: &mut Workflow, slots: &BTreeSet<TypeSlot>, file: &FileType) -> usize {
    let target = file.signature();
    let mut updated = 0;

    let mut adopt = |datatype: &mut DataType| {
        if datatype.signature().as_ref() != Some(&target) && datatype.adopt_file_type(file) {
            updated += 1;
        }
    };

    workflow.for_each_scope_mut(&mut |scope| {
        for input in scope.inputs.values_mut() {
            if slots.contains(&TypeSlot::WorkflowInput(input.uuid)) {
                adopt(&mut input.datatype);
            }
        }
        for output in scope.outputs.values_mut() {
            if slots.contains(&TypeSlot::WorkflowOutput(output.uuid)) {
                adopt(&mut output.datatype);
            }
        }
        for step in scope.steps.values_mut() {
            let tool = step.tool.uuid();
            for slot in slots {
                let datatype = match *slot {
                    TypeSlot::ToolInput { tool: owner, port } if owner == tool => {
                        step.tool.input_type_mut(port)
                    }
                    TypeSlot::ToolOutput { tool: owner, port } if owner == tool => {
                        step.tool.output_type_mut(port)
                    }
                    _ => None,
                };
                if let Some(datatype) = datatype {
                    adopt(datatype);
                }
            }
        }
    });

    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{
        CommandTool, Expression, InputNode, OutputNode, StepNode, Tool, ToolInput, ToolOutput,
    };

    fn tool(id: &str, input: DataType, output: DataType) -> Tool {
        Tool::Command(
            CommandTool::new(id)
                .with_input(ToolInput::new("inp", input))
                .with_output(ToolOutput::new("out", output)),
        )
    }

    fn at_fixpoint(workflow: &Workflow) -> bool {
        let connections = gather_connections(workflow).unwrap();
        connections.iter().all(|c| !needs_work(c, &connections))
    }

    /// input -> index (emits .bai) -> view (declares plain File) -> output
    fn bai_chain() -> Workflow {
        let mut workflow = Workflow::new("main");
        let bam = InputNode::new("bam", DataType::file());
        let bam_ref = bam.reference();
        workflow.add_input(bam).unwrap();

        let index = StepNode::new(
            "index",
            tool("samtools_index", DataType::file(), DataType::file_with(None, &[".bai"])),
        )
        .with_source("inp", bam_ref);
        let view = StepNode::new("view", tool("samtools_view", DataType::file(), DataType::file()))
            .with_source("inp", index.output("out"));
        let viewed = view.output("out");
        workflow.add_step(index).unwrap();
        workflow.add_step(view).unwrap();
        workflow
            .add_output(OutputNode::new("result", DataType::file(), viewed))
            .unwrap();
        workflow
    }

    #[test]
    fn test_consumer_adopts_producer_bai() {
        let mut workflow = bai_chain();
        let report = reconcile(&mut workflow, SubtypeDivergence::Preserve).unwrap();

        let view = workflow.find_step("view").unwrap();
        let port = view.tool.input_port("inp").unwrap();
        assert_eq!(port.datatype.file_type().unwrap().secondaries, vec![".bai"]);
        assert!(report.iterations >= 1);
        assert!(report.slots_updated >= 1);
    }

    #[test]
    fn test_fixpoint_has_no_mismatches() {
        let mut workflow = bai_chain();
        reconcile(&mut workflow, SubtypeDivergence::Preserve).unwrap();
        assert!(at_fixpoint(&workflow));
    }

    #[test]
    fn test_second_run_is_noop() {
        let mut workflow = bai_chain();
        reconcile(&mut workflow, SubtypeDivergence::Preserve).unwrap();
        let once = serde_json::to_string(&workflow).unwrap();

        let report = reconcile(&mut workflow, SubtypeDivergence::Preserve).unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(serde_json::to_string(&workflow).unwrap(), once);
    }

    #[test]
    fn test_matching_signatures_are_untouched() {
        let mut workflow = Workflow::new("main");
        let bam = InputNode::new("bam", DataType::file_with(Some("BamBai"), &["^.bai"]).into_optional());
        let bam_ref = bam.reference();
        workflow.add_input(bam).unwrap();
        workflow
            .add_step(
                StepNode::new("view", tool("view", DataType::file_with(None, &[".bai"]), DataType::file()))
                    .with_source("inp", bam_ref),
            )
            .unwrap();
        let before = workflow.clone();

        let report = reconcile(&mut workflow, SubtypeDivergence::Preserve).unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(workflow, before);
    }

    #[test]
    fn test_bare_consumer_adoption_keeps_optional_array() {
        let mut workflow = Workflow::new("main");
        let cram = InputNode::new("cram", DataType::file_with(None, &[".crai", ".md5"]));
        let cram_ref = cram.reference();
        workflow.add_input(cram).unwrap();
        workflow
            .add_step(
                StepNode::new(
                    "call",
                    tool(
                        "caller",
                        DataType::array(DataType::file()).into_optional(),
                        DataType::file(),
                    ),
                )
                .with_source("inp", cram_ref),
            )
            .unwrap();

        reconcile(&mut workflow, SubtypeDivergence::Preserve).unwrap();

        let step = workflow.find_step("call").unwrap();
        let datatype = step.tool.input_port("inp").unwrap().datatype;
        assert!(datatype.optional);
        assert!(matches!(datatype.kind, crate::workflow::TypeKind::Array(_)));
        assert_eq!(
            datatype.signature(),
            DataType::file_with(None, &[".md5", ".crai"]).signature()
        );
    }

    #[test]
    fn test_unsatisfied_consumer_widens_producer() {
        let mut workflow = Workflow::new("main");
        let bam = InputNode::new("bam", DataType::file_with(None, &[".bai"]));
        let bam_ref = bam.reference();
        workflow.add_input(bam).unwrap();
        workflow
            .add_step(
                StepNode::new(
                    "call",
                    tool("caller", DataType::file_with(None, &[".bai", ".md5"]), DataType::file()),
                )
                .with_source("inp", bam_ref),
            )
            .unwrap();

        reconcile(&mut workflow, SubtypeDivergence::Preserve).unwrap();

        let wide = DataType::file_with(None, &[".bai", ".md5"]).signature();
        assert_eq!(workflow.find_input("bam").unwrap().datatype.signature(), wide);
        assert!(at_fixpoint(&workflow));
    }

    #[test]
    fn test_narrower_consumer_is_left_alone() {
        let mut workflow = Workflow::new("main");
        let cram = InputNode::new("cram", DataType::file_with(None, &[".crai", ".md5"]));
        let cram_ref = cram.reference();
        workflow.add_input(cram).unwrap();
        workflow
            .add_step(
                StepNode::new("call", tool("caller", DataType::file_with(None, &[".crai"]), DataType::file()))
                    .with_source("inp", cram_ref),
            )
            .unwrap();
        let before = workflow.clone();

        let report = reconcile(&mut workflow, SubtypeDivergence::Preserve).unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(workflow, before);
    }

    /// `bam[.bai]` and `cram[.crai]` meet in one generic File input.
    fn fan_in() -> (Workflow, Expression, Expression) {
        let mut workflow = Workflow::new("main");
        let bam = InputNode::new("bam", DataType::file_with(None, &[".bai"]));
        let cram = InputNode::new("cram", DataType::file_with(None, &[".crai"]));
        let (bam_ref, cram_ref) = (bam.reference(), cram.reference());
        workflow.add_input(bam).unwrap();
        workflow.add_input(cram).unwrap();
        workflow
            .add_step(
                StepNode::new("depth", tool("depth", DataType::file(), DataType::file())).with_source(
                    "inp",
                    Expression::operator("first_non_null", vec![bam_ref.clone(), cram_ref.clone()]),
                ),
            )
            .unwrap();
        (workflow, bam_ref, cram_ref)
    }

    #[test]
    fn test_fan_in_with_different_signatures_is_untouched() {
        let (mut workflow, _, _) = fan_in();
        let before = workflow.clone();

        let report = reconcile(&mut workflow, SubtypeDivergence::Preserve).unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(workflow, before);
    }

    #[test]
    fn test_fan_in_partner_does_not_pull_in_shared_consumer() {
        let (mut workflow, bam_ref, _) = fan_in();
        workflow
            .add_step(StepNode::new("stats", tool("stats", DataType::file(), DataType::file())).with_source("inp", bam_ref))
            .unwrap();

        reconcile(&mut workflow, SubtypeDivergence::Preserve).unwrap();

        let bai = DataType::file_with(None, &[".bai"]).signature();
        let stats = workflow.find_step("stats").unwrap();
        assert_eq!(stats.tool.input_port("inp").unwrap().datatype.signature(), bai);
        let depth = workflow.find_step("depth").unwrap();
        assert_eq!(
            depth.tool.input_port("inp").unwrap().datatype.signature(),
            DataType::file().signature()
        );
        assert!(at_fixpoint(&workflow));
    }

    /// `pairs` independent `[.bai] -> []` connections, one round each.
    fn independent_pairs(pairs: usize) -> Workflow {
        let mut workflow = Workflow::new("main");
        for i in 0..pairs {
            let bam = InputNode::new(&format!("bam_{}", i), DataType::file_with(None, &[".bai"]));
            let bam_ref = bam.reference();
            workflow.add_input(bam).unwrap();
            workflow
                .add_step(
                    StepNode::new(&format!("view_{}", i), tool(&format!("view_{}", i), DataType::file(), DataType::file()))
                        .with_source("inp", bam_ref),
                )
                .unwrap();
        }
        workflow
    }

    #[test]
    fn test_ten_rounds_fit_under_the_cap() {
        let mut workflow = independent_pairs(MAX_ITERATIONS);
        let report = reconcile(&mut workflow, SubtypeDivergence::Preserve).unwrap();
        assert_eq!(report.iterations, MAX_ITERATIONS);
        assert!(at_fixpoint(&workflow));
    }

    #[test]
    fn test_divergence_names_last_central_node() {
        let mut workflow = independent_pairs(MAX_ITERATIONS + 1);
        let err = reconcile(&mut workflow, SubtypeDivergence::Preserve).unwrap_err();

        match &err {
            TranslateError::ReconciliationDiverged { node, uuid, iterations } => {
                assert_eq!(*iterations, MAX_ITERATIONS);
                let input = workflow.inputs.values().find(|i| i.uuid == *uuid).unwrap();
                assert!(node.starts_with(&input.id));
                assert!(node.contains("'main'"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.to_string().contains("did not converge"));
    }

    #[test]
    fn test_incompatible_signatures_fail() {
        let mut workflow = Workflow::new("main");
        let bam = InputNode::new("bam", DataType::file_with(None, &[".bai"]));
        let bam_ref = bam.reference();
        workflow.add_input(bam).unwrap();
        workflow
            .add_step(
                StepNode::new("s", tool("t", DataType::file_with(None, &[".crai"]), DataType::file()))
                    .with_source("inp", bam_ref),
            )
            .unwrap();

        let err = reconcile(&mut workflow, SubtypeDivergence::Preserve).unwrap_err();
        assert!(matches!(err, TranslateError::SecondaryTypeReconciliation { .. }));
        assert!(err.to_string().contains("bam"));
    }

    #[test]
    fn test_three_signatures_fail() {
        let mut workflow = Workflow::new("main");
        let bam = InputNode::new("bam", DataType::file_with(None, &[".bai"]));
        let bam_ref = bam.reference();
        workflow.add_input(bam).unwrap();
        let wide = DataType::file_with(None, &[".bai", ".md5"]);
        let wider = DataType::file_with(None, &[".bai", ".md5", ".sha"]);
        workflow
            .add_step(StepNode::new("a", tool("a", wide, DataType::file())).with_source("inp", bam_ref.clone()))
            .unwrap();
        workflow
            .add_step(StepNode::new("b", tool("b", wider, DataType::file())).with_source("inp", bam_ref))
            .unwrap();

        assert!(matches!(
            reconcile(&mut workflow, SubtypeDivergence::Preserve),
            Err(TranslateError::SecondaryTypeReconciliation { .. })
        ));
    }

    fn divergent_subtypes() -> Workflow {
        let mut workflow = Workflow::new("main");
        let bam = InputNode::new("bam", DataType::file_with(Some("BamBai"), &[".bai"]));
        let bam_ref = bam.reference();
        workflow.add_input(bam).unwrap();
        workflow
            .add_step(
                StepNode::new(
                    "s",
                    tool("t", DataType::file_with(Some("Bam"), &[]), DataType::file()),
                )
                .with_source("inp", bam_ref),
            )
            .unwrap();
        workflow
    }

    #[test]
    fn test_divergent_subtypes_are_preserved() {
        let mut workflow = divergent_subtypes();
        let before = workflow.clone();

        let report = reconcile(&mut workflow, SubtypeDivergence::Preserve).unwrap();
        assert_eq!(report.groups_preserved, 1);
        assert_eq!(workflow, before);
    }

    #[test]
    fn test_unify_policy_ignores_subtypes() {
        let mut workflow = divergent_subtypes();
        let report = reconcile(&mut workflow, SubtypeDivergence::Unify).unwrap();

        assert_eq!(report.groups_preserved, 0);
        let step = workflow.find_step("s").unwrap();
        let file = step.tool.input_port("inp").unwrap().datatype.file_type().unwrap().clone();
        assert_eq!(file, FileType::named("BamBai", &[".bai"]));
    }

    #[test]
    fn test_all_copies_of_a_tool_are_updated() {
        let shared = tool("view", DataType::file(), DataType::file());
        let mut workflow = Workflow::new("main");
        let bam = InputNode::new("bam", DataType::file_with(None, &[".bai"]));
        let other = InputNode::new("other", DataType::file_with(None, &[".bai"]));
        let (bam_ref, other_ref) = (bam.reference(), other.reference());
        workflow.add_input(bam).unwrap();
        workflow.add_input(other).unwrap();
        workflow
            .add_step(StepNode::new("first", shared.clone()).with_source("inp", bam_ref))
            .unwrap();
        workflow
            .add_step(StepNode::new("second", shared).with_source("inp", other_ref))
            .unwrap();

        reconcile(&mut workflow, SubtypeDivergence::Preserve).unwrap();

        for id in ["first", "second"] {
            let step = workflow.find_step(id).unwrap();
            let signature = step.tool.input_port("inp").unwrap().datatype.signature();
            assert_eq!(signature, DataType::file_with(None, &[".bai"]).signature());
        }
        assert!(at_fixpoint(&workflow));
    }

    #[test]
    fn test_subworkflow_boundary_is_reconciled() {
        let mut inner = Workflow::new("inner");
        let reads = InputNode::new("reads", DataType::file());
        let reads_ref = reads.reference();
        inner.add_input(reads).unwrap();
        inner
            .add_step(
                StepNode::new("idx", tool("idx", DataType::file_with(None, &[".fai"]), DataType::file()))
                    .with_source("inp", reads_ref),
            )
            .unwrap();

        let mut outer = Workflow::new("outer");
        let fasta = InputNode::new("fasta", DataType::file());
        let fasta_ref = fasta.reference();
        outer.add_input(fasta).unwrap();
        outer
            .add_step(StepNode::new("sub", Tool::Workflow(Box::new(inner))).with_source("reads", fasta_ref))
            .unwrap();

        reconcile(&mut outer, SubtypeDivergence::Preserve).unwrap();

        let fai = DataType::file_with(None, &[".fai"]).signature();
        assert_eq!(outer.find_input("fasta").unwrap().datatype.signature(), fai);
        let sub = outer.find_step("sub").unwrap().tool.as_workflow().unwrap();
        assert_eq!(sub.find_input("reads").unwrap().datatype.signature(), fai);
        assert!(at_fixpoint(&outer));
    }

    #[test]
    fn test_non_file_connections_are_ignored() {
        let mut workflow = Workflow::new("main");
        let threads = InputNode::new("threads", DataType::int());
        workflow.add_input(threads).unwrap();
        workflow
            .add_step(
                StepNode::new("s", tool("t", DataType::string(), DataType::file()))
                    .with_source("inp", Expression::literal("x")),
            )
            .unwrap();

        let report = reconcile(&mut workflow, SubtypeDivergence::Preserve).unwrap();
        assert_eq!(report.iterations, 0);
    }
}
