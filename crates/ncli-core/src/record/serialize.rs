//! Turns a validated command back into command-line text.

use crate::command::{BoundValue, ValidatedCommand};
use crate::document::needs_quotes;
use crate::error::{NcliError, Result};
use crate::schema::ParamType;

/// Serializes the parameters the user gave; defaults are left out.
///
/// Flags are written bare, datastores as `name=ds`, and strings and
/// passwords are quoted when they contain characters the tokenizer would
/// split on. Parameters holding a tree cannot be written back.
pub fn command_line(cmd: &ValidatedCommand) -> Result<String> {
    let mut line = cmd.name().to_string();
    for param in cmd.params.iter().filter(|p| !p.set_by_default) {
        let name = &param.descriptor.name;
        line.push(' ');
        line.push_str(name);
        match (&param.descriptor.ty, &param.value) {
            (_, BoundValue::Flag) | (ParamType::Empty, _) => {}
            (_, BoundValue::Text(text)) => {
                line.push('=');
                line.push_str(&quote(text));
            }
            (_, BoundValue::Tree(_)) => {
                return Err(NcliError::execution(format!(
                    "cannot record complex value '{name}'"
                )));
            }
        }
    }
    Ok(line)
}

fn quote(text: &str) -> String {
    if !needs_quotes(text) {
        text.to_string()
    } else if text.contains('"') {
        format!("'{text}'")
    } else {
        format!("\"{text}\"")
    }
}
