//! CLI support for the `asub-exec` binary.
//!
//! ## Usage
//!
//! ```bash
//! asub-exec run --config tasks.toml --task calc \
//!     --inputs '{"A": {"type": "LONG", "values": [1, 2]}}' \
//!     --outputs '{"VALA": {"type": "LONG", "count": 2}}'
//! asub-exec config show --config tasks.toml
//! asub-exec config validate --config tasks.toml
//! ```

pub mod config_cmd;
pub mod run_cmd;

use std::collections::BTreeMap;

use serde_json::{json, Value};
use thiserror::Error;

use crate::config::ConfigError;
use crate::field::{output_slot_name, parse_slot_name, Field, FieldError, FieldSet, FieldValue, OutputSpec};
use crate::session::SessionError;
use crate::telemetry::LogError;
use crate::wire::TypeTag;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Missing required option {0}")]
    MissingOption(&'static str),

    #[error("Invalid JSON: {0}")]
    Json(String),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("Worker wait failed: {0}")]
    Join(String),
}

/// Value following `flag` in `args`, if any.
pub fn option_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Parse `{"A": {"type": "LONG", "values": [..]}, ...}` into an input set.
pub fn parse_inputs(text: &str) -> Result<FieldSet, CliError> {
    let raw: BTreeMap<String, FieldValue> =
        serde_json::from_str(text).map_err(|e| CliError::Json(e.to_string()))?;
    let mut inputs = FieldSet::new();
    for (name, value) in raw {
        let slot = parse_slot_name(&name)?;
        inputs.set(slot, Field::from_value(&value)?)?;
    }
    Ok(inputs)
}

/// Largest buffer one requested output may reserve.
pub const MAX_OUTPUT_BYTES: u64 = 64 * 1024 * 1024;

/// Parse `{"VALA": {"type": "LONG", "count": 2}, ...}` into a zero-filled
/// output set. Each slot is capped at [`MAX_OUTPUT_BYTES`].
pub fn parse_outputs(text: &str) -> Result<FieldSet, CliError> {
    let raw: BTreeMap<String, OutputSpec> =
        serde_json::from_str(text).map_err(|e| CliError::Json(e.to_string()))?;
    let mut outputs = FieldSet::new();
    for (name, spec) in raw {
        let slot = parse_slot_name(&name)?;
        outputs.set(slot, Field::bounded(spec.kind, spec.count, MAX_OUTPUT_BYTES)?)?;
    }
    Ok(outputs)
}

/// Used output slots as `{"VALA": {"type": .., "values": [..]}, ...}`.
pub fn outputs_to_json(outputs: &FieldSet) -> Result<Value, CliError> {
    let mut map = serde_json::Map::new();
    for (slot, field) in outputs.iter().enumerate() {
        if field.kind() == TypeTag::None {
            continue;
        }
        let value = serde_json::to_value(field.value()?).map_err(|e| CliError::Json(e.to_string()))?;
        map.insert(output_slot_name(slot), value);
    }
    Ok(Value::Object(map))
}

pub(crate) fn error_json(error: &dyn std::fmt::Display) -> Value {
    json!({ "error": error.to_string() })
}
