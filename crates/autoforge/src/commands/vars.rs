//! `autoforge vars` dispatch.

use crate::cli::VarsCommand;
use crate::config::Loaded;
use anyhow::Result;
use autoforge_core::io::Output;

pub fn execute_vars(loaded: &Loaded, action: &VarsCommand, json: bool) -> Result<i32> {
    let mut output = Output::new();
    match action {
        VarsCommand::List => {
            let variables = loaded.ctx.variables.export();
            if json {
                let rows: Vec<_> = variables
                    .iter()
                    .map(|v| serde_json::json!({"name": v.name, "value": v.value}))
                    .collect();
                output.write_json(&rows)?;
            } else {
                for var in &variables {
                    output.write_line(&format!("{} = {}", var.name, var.value))?;
                }
            }
        }
        VarsCommand::Get { key } => {
            let value = loaded.ctx.variables.get(key, false)?;
            if json {
                output.write_json(&serde_json::json!({"name": key, "value": value}))?;
            } else {
                output.write_line(&value)?;
            }
        }
        VarsCommand::Set { key, value } => {
            loaded.ctx.variables.set(key, value)?;
            if !json {
                output.write_line(&format!("{key} = {value}"))?;
            }
        }
    }
    Ok(0)
}
