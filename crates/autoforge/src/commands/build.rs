//! `autoforge build` dispatch.

use crate::cli::BuildArgs;
use crate::config::Loaded;
use anyhow::{bail, Context as _, Result};
use autoforge_core::builder::{BuildOutcome, BuildProfile};
use autoforge_core::errors::normalize_message;
use autoforge_core::io::Output;
use autoforge_core::loader;
use autoforge_core::solution::{Configuration, ConfigQuery};
use indexmap::IndexMap;
use std::time::Duration;
use tracing::{info, instrument};

/// Liveness budget for one build invocation (`spec.md` §4.10 "watchdog ... runs
/// alongside the whole process"). Generous relative to any single shell step's own
/// timeout, since this guards against the CLI process itself wedging, not a slow tool.
const BUILD_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(600);

/// Expand every variable-bearing string field of `config` against `store`, the way
/// the engine expands a configuration's declared steps before execution.
fn expand_configuration(
    config: &Configuration,
    store: &autoforge_core::variable::VariableStore,
) -> Result<Configuration> {
    let expand = |s: &str| -> Result<String> { Ok(store.expand(s, true)?) };
    let expand_opt = |s: &Option<String>| -> Result<Option<String>> {
        s.as_ref().map(|v| expand(v)).transpose()
    };
    let expand_vec = |v: &[String]| -> Result<Vec<String>> { v.iter().map(|s| expand(s)).collect() };
    let expand_steps = |m: &IndexMap<String, String>| -> Result<IndexMap<String, String>> {
        m.iter()
            .map(|(k, v)| Ok((k.clone(), expand(v)?)))
            .collect()
    };

    Ok(Configuration {
        name: config.name.clone(),
        build_path: expand(&config.build_path)?,
        execute_from: expand_opt(&config.execute_from)?,
        compiler_options: expand_vec(&config.compiler_options)?,
        artifacts: expand_vec(&config.artifacts)?,
        pre_build_steps: expand_steps(&config.pre_build_steps)?,
        post_build_steps: expand_steps(&config.post_build_steps)?,
        clean: expand_opt(&config.clean)?,
        board: config.board.clone(),
    })
}

#[instrument(skip(loaded, args), fields(project = %args.project, configuration = %args.configuration))]
pub async fn execute_build(loaded: &Loaded, args: &BuildArgs, json: bool) -> Result<i32> {
    let Loaded { ctx, model } = loaded;

    let project = model
        .query_projects()
        .iter()
        .find(|p| p.name == args.project)
        .with_context(|| format!("unknown project '{}'", args.project))?;

    let config = match model.query_configurations(&args.project, Some(&args.configuration))? {
        ConfigQuery::Single(c) => c,
        ConfigQuery::List(_) => bail!("configuration '{}' did not resolve to a single entry", args.configuration),
    };

    let expanded_config = expand_configuration(&config, &ctx.variables)?;

    let mut extra_args = Vec::new();
    if args.clean {
        extra_args.push("--clean".to_string());
    }
    if args.clean_build {
        extra_args.push("--clean_build".to_string());
    }
    extra_args.extend(args.extra.iter().cloned());

    let profile = BuildProfile {
        solution_name: args.solution.clone(),
        project_name: args.project.clone(),
        config_name: args.configuration.clone(),
        config_data: expanded_config,
        tool_chain_data: project.tool_chain.clone(),
        extra_args,
        terminal_leading_text: None,
    };

    ctx.watchdog.start(BUILD_WATCHDOG_TIMEOUT);
    let outcome = match loader::execute_build(&ctx.registry, &profile).await {
        Ok(outcome) => outcome,
        Err(e) => BuildOutcome::Failed {
            exit_code: e.exit_code(),
            message: normalize_message(&e.to_string()),
        },
    };
    ctx.watchdog.stop();

    let success_counter = ctx.telemetry.get_or_create_counter("builds.success", "1", "successful builds");
    let failed_counter = ctx.telemetry.get_or_create_counter("builds.failed", "1", "failed builds");

    let mut output = Output::new();
    match outcome {
        BuildOutcome::Success { return_code } => {
            success_counter.add(1);
            info!("Build of '{}/{}' succeeded", args.project, args.configuration);
            if json {
                output.write_json(&serde_json::json!({
                    "status": "success",
                    "project": args.project,
                    "configuration": args.configuration,
                }))?;
            } else {
                output.write_line(&format!(
                    "Build of '{}/{}' succeeded.",
                    args.project, args.configuration
                ))?;
            }
            Ok(return_code)
        }
        BuildOutcome::EarlyExit { exit_code, message } => {
            success_counter.add(1);
            if json {
                output.write_json(&serde_json::json!({"status": "early_exit", "message": message}))?;
            } else {
                output.write_line(&message)?;
            }
            Ok(exit_code)
        }
        BuildOutcome::Failed { message, exit_code } => {
            failed_counter.add(1);
            let message = normalize_message(&message);
            if json {
                output.write_json(&serde_json::json!({"status": "failed", "message": message}))?;
            } else {
                eprintln!("{message}");
            }
            Ok(exit_code)
        }
    }
}
