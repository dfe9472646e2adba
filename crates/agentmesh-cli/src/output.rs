//! Output helpers

use serde::Serialize;

use crate::error::{CliError, CliResult};

/// Print `value` as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::Internal(e.to_string()))?;
    println!("{}", text);
    Ok(())
}
