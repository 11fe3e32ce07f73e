//! JSON Schema generation for CLI output types.
//!
//! Every command that supports `--json` prints a [`StageStats`]; the schemas
//! are exported via the `schema` subcommand.

use crate::config::StagerConfig;
use crate::pipeline::StageStats;
use schemars::{schema_for, Schema};
use std::collections::BTreeMap;

/// Returns all JSON schemas, keyed by command name.
/// Uses BTreeMap for deterministic ordering (important for diffable output).
pub fn all_schemas() -> BTreeMap<&'static str, Schema> {
    let mut schemas = BTreeMap::new();

    schemas.insert("analyze", schema_for!(StageStats));
    schemas.insert("flatten", schema_for!(StageStats));
    schemas.insert("split", schema_for!(StageStats));

    // not an output, but documents the --config file
    schemas.insert("config", schema_for!(StagerConfig));

    schemas
}

/// Generate a single schema by command name.
pub fn get_schema(command: &str) -> Option<Schema> {
    all_schemas().remove(command)
}

/// List all available schema names.
pub fn schema_names() -> Vec<&'static str> {
    all_schemas().keys().copied().collect()
}
