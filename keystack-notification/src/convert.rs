//! String to primitive coercion for variable registrations.

use keystack_plugin_host::VariableSlot;
use keystack_types::Key;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionError {
    #[error("binary value cannot be assigned to a {kind} variable")]
    Binary { kind: &'static str },

    #[error("'{value}' is not a valid {kind}")]
    Parse { value: String, kind: &'static str },
}

/// Parses the key's string value into the variable behind `slot`.
///
/// The whole string must parse; on failure the variable keeps its value.
pub fn assign(slot: &VariableSlot, key: &Key) -> Result<(), CoercionError> {
    let kind = slot.kind();
    let text = key.string().ok_or(CoercionError::Binary { kind })?;
    match slot {
        VariableSlot::Int(variable) => variable.set(parse(text, kind)?),
        VariableSlot::Long(variable) => variable.set(parse(text, kind)?),
        VariableSlot::UnsignedLong(variable) => variable.set(parse(text, kind)?),
        VariableSlot::Float(variable) => variable.set(parse(text, kind)?),
        VariableSlot::Double(variable) => variable.set(parse(text, kind)?),
    }
    Ok(())
}

fn parse<T: FromStr>(text: &str, kind: &'static str) -> Result<T, CoercionError> {
    text.parse().map_err(|_| CoercionError::Parse {
        value: text.to_string(),
        kind,
    })
}
