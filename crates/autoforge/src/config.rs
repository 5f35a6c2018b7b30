//! Process-level configuration: resolves the solution file, builds the Variable
//! Store and Solution Model from it, and wires the Module Registry with the
//! built-in builders. Built once in `main` and threaded into command dispatch
//! instead of read from globals (`spec.md` §9's `Env`/`Context` redesign note).

use anyhow::{Context as _, Result};
use autoforge_core::context::Context;
use autoforge_core::jsonc;
use autoforge_core::loader;
use autoforge_core::registry::Registry;
use autoforge_core::solution::{SolutionFile, SolutionModel};
use autoforge_core::telemetry::Telemetry;
use autoforge_core::variable::{VariableOptions, VariableStore, VariableStoreConfig};
use autoforge_core::watchdog::Watchdog;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default solution file path tried when `--config` is not given. [`jsonc::preprocess_file`]
/// itself falls back to the sibling `.json`/`.jsonc` extension if this exact name is absent.
pub const DEFAULT_SOLUTION_PATH: &str = "solution.jsonc";

/// Everything a command needs once the solution file has been ingested: the
/// process context (Registry, Variable Store, Telemetry, Watchdog) and a read-only
/// view over the loaded solution.
pub struct Loaded {
    pub ctx: Context,
    pub model: SolutionModel,
}

/// Ingest the solution file at `path` (or [`DEFAULT_SOLUTION_PATH`]): preprocess
/// JSONC, parse the typed schema, populate the Variable Store from its `variables`
/// array, select the (first, or named) solution, and register the built-in
/// CMake/Make builders into a fresh Registry.
pub fn load(path: Option<&Path>, solution_name: Option<&str>) -> Result<Loaded> {
    let resolved_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOLUTION_PATH));

    let raw = jsonc::preprocess_file(&resolved_path)
        .with_context(|| format!("loading solution file '{}'", resolved_path.display()))?;
    let file = SolutionFile::from_value(raw)
        .with_context(|| format!("parsing solution file '{}'", resolved_path.display()))?;

    let variables = build_variable_store(&file)?;
    let ctx = Context {
        registry: Arc::new(Registry::new()),
        variables: Arc::new(variables),
        telemetry: Arc::new(Telemetry::new()),
        watchdog: Arc::new(Watchdog::new()),
    };

    let model = SolutionModel::select(&file, solution_name)?;
    loader::register_builtin_modules(&ctx.registry)?;
    ctx.telemetry.mark_module_boot("registry");
    ctx.telemetry.mark_module_boot("variables");
    ctx.telemetry.mark_module_boot("solution");

    Ok(Loaded { ctx, model })
}

/// Determine the store's normalization policy and add every declared variable.
/// `auto_prefix` derives its prefix from the `PROJECT_NAME` variable's value
/// (uppercased, with a trailing underscore) — the original implementation's
/// behavior; the distilled schema only carries the boolean toggle (`spec.md` §9.1
/// item 2: a name already carrying the prefix is left as-is, never doubled).
fn build_variable_store(file: &SolutionFile) -> Result<VariableStore> {
    let project_name = file
        .variables
        .iter()
        .find(|v| v.name == "PROJECT_NAME")
        .map(|v| v.value.clone());

    let auto_prefix = match (file.auto_prefix, project_name) {
        (Some(true), Some(name)) => Some(format!("{}_", name.to_uppercase())),
        _ => None,
    };

    let store = VariableStore::new(VariableStoreConfig {
        auto_prefix,
        force_upper_case_names: file.force_upper_case_names.unwrap_or(false),
    });

    let defaults = file.defaults.clone().unwrap_or_default();
    for var in &file.variables {
        store
            .add(
                &var.name,
                &var.value,
                VariableOptions {
                    description: var.description.clone(),
                    is_path: var.is_path.unwrap_or(false),
                    path_must_exist: var
                        .path_must_exist
                        .or(defaults.path_must_exist)
                        .unwrap_or(false),
                    create_path_if_not_exist: var
                        .create_path_if_not_exist
                        .or(defaults.create_path_if_not_exist)
                        .unwrap_or(false),
                    folder_type: None,
                    extras: Default::default(),
                },
            )
            .with_context(|| format!("adding variable '{}'", var.name))?;
    }

    Ok(store)
}
