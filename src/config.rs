//! Translation Configuration
//!
//! Settings consumed by the pass pipeline: the destination dialect, the
//! simplification mode, safe mode and the subtype-divergence policy of
//! the reconciliation pass. Loadable from a YAML file; CLI flags override
//! the file.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TranslateError};

/// Destination dialect for code generation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Cwl,
    Wdl,
    Nextflow,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Cwl => "cwl",
            Dialect::Wdl => "wdl",
            Dialect::Nextflow => "nextflow",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = TranslateError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "cwl" => Ok(Dialect::Cwl),
            "wdl" => Ok(Dialect::Wdl),
            "nextflow" | "nf" => Ok(Dialect::Nextflow),
            _ => Err(TranslateError::Config(format!(
                "unknown dialect '{}'; supported values are cwl, wdl, nextflow",
                value
            ))),
        }
    }
}

/// How much tool interface pruning to perform.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SimplificationMode {
    #[default]
    Off,
    /// Usage-driven liveness analysis
    On,
    /// Keep only required or defaulted inputs and required outputs
    Aggressive,
}

impl SimplificationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimplificationMode::Off => "off",
            SimplificationMode::On => "on",
            SimplificationMode::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for SimplificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SimplificationMode {
    type Err = TranslateError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "off" => Ok(SimplificationMode::Off),
            "on" => Ok(SimplificationMode::On),
            "aggressive" => Ok(SimplificationMode::Aggressive),
            _ => Err(TranslateError::Config(format!(
                "unknown simplification mode '{}'; supported values are off, on, aggressive",
                value
            ))),
        }
    }
}

/// What reconciliation does when a group of connected types names more
/// than one file subtype.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubtypeDivergence {
    /// Leave the group untouched; the subtypes are taken to be unrelated
    #[default]
    Preserve,
    /// Ignore subtype names and reconcile on secondary files alone
    Unify,
}

impl FromStr for SubtypeDivergence {
    type Err = TranslateError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "preserve" => Ok(SubtypeDivergence::Preserve),
            "unify" => Ok(SubtypeDivergence::Unify),
            _ => Err(TranslateError::Config(format!(
                "unknown subtype divergence policy '{}'; supported values are preserve, unify",
                value
            ))),
        }
    }
}

/// Settings for one translation run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct TranslationConfig {
    pub dialect: Dialect,

    pub simplification: SimplificationMode,

    /// Roll back a failing pass instead of aborting the run
    pub safe_mode: bool,

    pub subtype_divergence: SubtypeDivergence,
}

impl TranslationConfig {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    pub fn with_simplification(mut self, mode: SimplificationMode) -> Self {
        self.simplification = mode;
        self
    }

    pub fn with_safe_mode(mut self, enabled: bool) -> Self {
        self.safe_mode = enabled;
        self
    }

    pub fn with_subtype_divergence(mut self, policy: SubtypeDivergence) -> Self {
        self.subtype_divergence = policy;
        self
    }
}

/// Loads a translation config from a YAML file.
///
/// Missing keys take their defaults, so an empty file is a valid config.
pub fn load_config(path: impl AsRef<Path>) -> Result<TranslationConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {}", path.display());

    let text = fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(TranslationConfig::default());
    }

    let config: TranslationConfig =
        serde_yaml::from_str(&text).map_err(|e| TranslateError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    debug!("Configuration: {:?}", config);
    Ok(config)
}
