//! Workflow Loader
//!
//! Reads and writes serialized workflow trees. Ingesters for the source
//! dialects hand their result over as a JSON or YAML document; the
//! transformed tree goes back out as JSON for the code generators.

use std::fs;
use std::path::Path;

use log::{debug, info};

use super::model::Workflow;
use super::validator::validate_workflow;
use crate::error::{Result, TranslateError};

/// Document encodings understood by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    /// Picks the encoding from the file extension; anything that is not
    /// `.json` is read as YAML (a superset of JSON).
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

/// Parses a workflow document from text.
pub fn parse_workflow(text: &str, format: Format, label: &str) -> Result<Workflow> {
    let parsed = match format {
        Format::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        Format::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
    };
    parsed.map_err(|reason| TranslateError::Parse {
        path: label.to_string(),
        reason,
    })
}

/// Loads a workflow tree from a file and validates it.
///
/// # Example
///
/// ```rust,no_run
/// use wfbridge::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("ingested.json")?;
///     println!("Loaded {} steps", workflow.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: impl AsRef<Path>) -> Result<Workflow> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let text = fs::read_to_string(path)?;
    debug!("Workflow document loaded ({} bytes)", text.len());

    let workflow = parse_workflow(&text, Format::from_path(path), &path.display().to_string())?;
    info!(
        "Parsed workflow '{}': {} inputs, {} steps, {} outputs",
        workflow.id,
        workflow.inputs.len(),
        workflow.steps.len(),
        workflow.outputs.len()
    );

    validate_workflow(&workflow)?;
    Ok(workflow)
}

/// Serializes a workflow tree as pretty JSON.
pub fn to_json(workflow: &Workflow) -> Result<String> {
    serde_json::to_string_pretty(workflow).map_err(|e| TranslateError::Parse {
        path: workflow.id.clone(),
        reason: e.to_string(),
    })
}

/// Writes a workflow tree to `path` as pretty JSON.
pub fn save_workflow(workflow: &Workflow, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, to_json(workflow)?)?;
    info!("Saved workflow '{}' to {}", workflow.id, path.display());
    Ok(())
}
