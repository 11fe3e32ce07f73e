//! YAML configuration.
//!
//! ```yaml
//! batches: 12
//! header: true
//! retained_settings: [search_path, check_function_bodies]
//! type_guard: catalog
//! constraint_scope: table
//! ```
//!
//! Every key is optional. Command-line flags override file values.

use crate::batch::DEFAULT_BATCH_COUNT;
use crate::error::{Result, StagerError};
use crate::rewriter::{ConstraintScope, RewriteOptions, TypeGuard};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct StagerConfig {
    /// Number of batch files to produce
    pub batches: usize,
    /// Write a `-- part i of N` comment at the top of each batch file
    pub header: bool,
    /// `SET` options kept in the output; all other `SET`s are dropped
    pub retained_settings: Vec<String>,
    pub type_guard: TypeGuard,
    pub constraint_scope: ConstraintScope,
}

impl Default for StagerConfig {
    fn default() -> Self {
        let options = RewriteOptions::default();
        Self {
            batches: DEFAULT_BATCH_COUNT,
            header: false,
            retained_settings: options.retained_settings,
            type_guard: options.type_guard,
            constraint_scope: options.constraint_scope,
        }
    }
}

impl StagerConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| StagerError::io(path, e))?;
        Self::from_yaml(&content).map_err(|message| StagerError::Config {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_yaml(content: &str) -> std::result::Result<Self, String> {
        let config: StagerConfig = serde_yaml_ng::from_str(content).map_err(|e| e.to_string())?;
        if config.batches == 0 {
            return Err("batches must be at least 1".to_string());
        }
        Ok(config)
    }

    /// Load from `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn rewrite_options(&self) -> RewriteOptions {
        RewriteOptions {
            retained_settings: self
                .retained_settings
                .iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
            type_guard: self.type_guard,
            constraint_scope: self.constraint_scope,
        }
    }
}
