//! Error Types
//!
//! Every failure raised by the IR model or one of the passes. Structural
//! errors name the offending node's display id and UUID, since these bugs
//! otherwise only show up as malformed generated code.

use thiserror::Error;

use crate::workflow::NodeId;

/// Errors raised while loading, validating or transforming a workflow tree.
#[derive(Debug, Error)]
pub enum TranslateError {
    /// The derived step dependency graph is not a DAG.
    #[error("Workflow '{workflow}' contains a dependency cycle through step '{step}' ({uuid})")]
    GraphCycle {
        workflow: String,
        step: String,
        uuid: NodeId,
    },

    /// A selector points at a node that does not exist in its scope.
    #[error("Node '{node}' ({uuid}) references unknown {target} in workflow '{workflow}'")]
    UnresolvedReference {
        workflow: String,
        node: String,
        uuid: NodeId,
        target: String,
    },

    /// Secondary-file signatures could not be unified.
    #[error("Cannot reconcile secondary files around '{node}' ({uuid}): {reason}")]
    SecondaryTypeReconciliation {
        node: String,
        uuid: NodeId,
        reason: String,
    },

    /// The reconciliation loop did not reach a fixpoint. Names the central
    /// node of the round that hit the cap.
    #[error("Secondary file reconciliation did not converge after {iterations} iterations, last at '{node}' ({uuid})")]
    ReconciliationDiverged {
        node: String,
        uuid: NodeId,
        iterations: usize,
    },

    /// No renaming strategy produced a legal, unique identifier.
    #[error("Could not find a legal identifier for '{node}' ({uuid}) in {dialect}: {reason}")]
    SymbolAlterationExhausted {
        node: String,
        uuid: NodeId,
        dialect: String,
        reason: String,
    },

    /// Pruning would remove something that is still referenced.
    #[error("Pruning tool '{tool}' ({uuid}) left an inconsistency: {reason}")]
    PruneInconsistency {
        tool: String,
        uuid: NodeId,
        reason: String,
    },

    /// Two siblings in the same scope share a display id.
    #[error("Duplicate id '{id}' in {scope}")]
    DuplicateId { scope: String, id: String },

    /// A configuration value was rejected.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A workflow or config document could not be decoded.
    #[error("Failed to parse '{path}': {reason}")]
    Parse { path: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TranslateError {
    /// Errors that abort the run even when safe mode is enabled.
    pub fn is_always_fatal(&self) -> bool {
        matches!(
            self,
            Self::GraphCycle { .. } | Self::Io(_) | Self::Parse { .. } | Self::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TranslateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_names_step_and_uuid() {
        let uuid = NodeId::new();
        let err = TranslateError::GraphCycle {
            workflow: "main".to_string(),
            step: "align".to_string(),
            uuid,
        };
        let message = err.to_string();
        assert!(message.contains("align"));
        assert!(message.contains(&uuid.to_string()));
        assert!(err.is_always_fatal());
    }

    #[test]
    fn test_pass_errors_are_recoverable() {
        let err = TranslateError::PruneInconsistency {
            tool: "bwa".to_string(),
            uuid: NodeId::new(),
            reason: "scatter field 'reads' was removed".to_string(),
        };
        assert!(!err.is_always_fatal());
        assert!(err.to_string().contains("scatter field"));
    }

    #[test]
    fn test_divergence_names_node_and_uuid() {
        let uuid = NodeId::new();
        let err = TranslateError::ReconciliationDiverged {
            node: "bam (in 'main')".to_string(),
            uuid,
            iterations: 10,
        };
        let message = err.to_string();
        assert!(message.contains("bam (in 'main')"));
        assert!(message.contains(&uuid.to_string()));
        assert!(message.contains("10 iterations"));
        assert!(!err.is_always_fatal());
    }
}
