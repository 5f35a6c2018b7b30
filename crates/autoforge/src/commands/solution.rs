//! `autoforge solution` dispatch.

use crate::cli::SolutionCommand;
use crate::config::Loaded;
use anyhow::Result;
use autoforge_core::io::Output;
use autoforge_core::solution::SolutionView;

pub fn execute_solution(loaded: &Loaded, action: &SolutionCommand, json: bool) -> Result<i32> {
    let mut output = Output::new();
    match action {
        SolutionCommand::Show => {
            let SolutionView::Full(solution) = loaded.model.get_loaded_solution(false) else {
                unreachable!("get_loaded_solution(false) always returns Full");
            };
            if json {
                output.write_json(solution)?;
            } else {
                output.write_line(&format!("Solution: {}", solution.name))?;
                for project in &solution.projects {
                    output.write_line(&format!(
                        "  {} ({}/{})",
                        project.name, project.tool_chain.name, project.tool_chain.build_system
                    ))?;
                    for config in &project.configurations {
                        output.write_line(&format!("    {}", config.name))?;
                    }
                }
            }
        }
    }
    Ok(0)
}
