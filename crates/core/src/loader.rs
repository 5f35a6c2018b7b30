//! Dynamic Loader (C5): populates the Module Registry (C4) with Commands and
//! Builders, and dispatches execution against whatever got registered.
//!
//! Grounded on `core/dynamic_loader.py`'s `CoreDynamicLoader`: `probe()` scans a
//! directory, imports each file, finds a class implementing a supported interface, and
//! registers an instance; `execute_command`/`execute_build` resolve a record by name
//! and kind and invoke the interface method. Rust has no runtime equivalent of
//! `importlib` reflection, so that probe step becomes **manifest-driven static
//! registration** instead (`register_builtin_modules`): every `Command`/`Builder` is a
//! concrete type known at compile time, and the loader's job is just wiring it into
//! the Registry under a name, the way `probe()` wires in a dynamically-imported class.
//! The directory-scanning path survives only as a `dev-scan`-gated escape hatch (see
//! `scan_manifest_directory`) for loading metadata-only stub records during local
//! development; it is never reached by the production CLI path (`spec.md` §9.1 item 3).

use crate::builder::{self, BuildOutcome, BuildProfile, Builder, CMakeBuilder, MakeBuilder};
use crate::context::Context;
use crate::errors::{AutoForgeError, Result};
use crate::registry::{ModuleKind, RegisterRequest, Registry};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Where a [`Command`] implementation writes its output. `execute_command` picks the
/// concrete sink (teed to the terminal, or capture-only) based on `suppress_output`;
/// either way every line lands in the buffer [`last_output`] returns.
pub trait CommandOutputSink: Send + Sync {
    fn on_line(&self, line: &str, is_stderr: bool);
}

/// One module a [`Command`] implementation can be invoked through, mirroring the
/// original's `execute(flat_args=...)` signature. `spec.md` §4.5 "arguments
/// pre-tokenized in shell style": `execute_command` tokenizes the caller's flat
/// argument string with `shell-words` before handing it to the implementation, so
/// `Command` impls never re-parse quoting themselves.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, ctx: &Context, args: &[String], sink: &dyn CommandOutputSink) -> Result<i32>;
}

/// Transcript of the most recent [`execute_command`] call, teed-to-terminal or not.
static LAST_OUTPUT: once_cell::sync::Lazy<std::sync::Mutex<Vec<String>>> =
    once_cell::sync::Lazy::new(|| std::sync::Mutex::new(Vec::new()));

/// The full stdout/stderr transcript of the most recently dispatched command, in the
/// order lines were produced. `spec.md` §4.5 "retrievable via `last_output()`".
pub fn last_output() -> Vec<String> {
    LAST_OUTPUT.lock().unwrap().clone()
}

struct TeeSink;
impl CommandOutputSink for TeeSink {
    fn on_line(&self, line: &str, is_stderr: bool) {
        if is_stderr {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
        LAST_OUTPUT.lock().unwrap().push(line.to_string());
    }
}

struct CaptureOnlySink;
impl CommandOutputSink for CaptureOnlySink {
    fn on_line(&self, line: &str, _is_stderr: bool) {
        LAST_OUTPUT.lock().unwrap().push(line.to_string());
    }
}

/// Register the built-in builders (`cmake`, `make`) into `registry`. This is the
/// production registration path: every module it adds is a concrete Rust type, not a
/// dynamically discovered one.
///
/// Fails with [`AutoForgeError::LoadError`] only if nothing at all got registered,
/// mirroring `probe()`'s "zero plugins loaded across all paths" failure condition.
#[instrument(skip(registry))]
pub fn register_builtin_modules(registry: &Registry) -> Result<usize> {
    let mut failures = Vec::new();
    let mut registered = 0usize;

    let builders: Vec<(&str, &str, Arc<dyn std::any::Any + Send + Sync>)> = vec![
        ("cmake", "CMakeBuilder", Arc::new(CMakeBuilder) as Arc<dyn std::any::Any + Send + Sync>),
        ("make", "MakeBuilder", Arc::new(MakeBuilder) as Arc<dyn std::any::Any + Send + Sync>),
    ];

    for (name, class_name, instance) in builders {
        let req = RegisterRequest {
            class_name: Some(class_name.to_string()),
            instance: Some(instance),
            class_interface_name: Some("Builder".to_string()),
            ..Default::default()
        };
        match registry.register(name, &format!("{class_name} builder"), ModuleKind::Builder, req) {
            Ok(_) => {
                info!("Registered builtin builder '{}'", name);
                registered += 1;
            }
            Err(e) => {
                warn!("Failed to register builtin builder '{}': {}", name, e);
                failures.push(name.to_string());
            }
        }
    }

    if registered == 0 {
        return Err(AutoForgeError::LoadError(failures));
    }
    Ok(registered)
}

/// Register `commands`, each keyed by [`Command::name`], under `ModuleKind::Command`.
/// Intended for the handful of built-in commands the CLI exposes through the
/// Registry rather than calling directly (see `spec.md` §4.5 "Execution dispatch").
pub fn register_commands(registry: &Registry, commands: Vec<Arc<dyn Command>>) -> Result<usize> {
    let mut registered = 0usize;
    for command in commands {
        let name = command.name().to_string();
        let req = RegisterRequest {
            class_name: Some(name.clone()),
            instance: Some(Arc::new(()) as Arc<dyn std::any::Any + Send + Sync>),
            class_interface_name: Some("Command".to_string()),
            ..Default::default()
        };
        registry.register(&name, "", ModuleKind::Command, req)?;
        install_command(command);
        registered += 1;
    }
    Ok(registered)
}

/// Resolve `name` as a registered `ModuleKind::Command`, tokenize `flat_args` in
/// shell style, and invoke it. Fails with [`AutoForgeError::Unknown`] if `name` isn't
/// registered, or isn't registered as a command; fails with
/// [`AutoForgeError::ParseError`] if `flat_args` isn't valid shell-style quoting.
///
/// When `suppress_output` is set, everything the command writes is captured only (no
/// terminal output); otherwise it's teed to the terminal as well. Either way the
/// transcript is retrievable afterward via [`last_output`], matching `spec.md` §4.5.
#[instrument(skip(ctx, flat_args), fields(name = %name))]
pub async fn execute_command(
    ctx: &Context,
    name: &str,
    flat_args: Option<&str>,
    suppress_output: bool,
) -> Result<i32> {
    let record = ctx.registry.get_by_name(name, true).ok_or_else(|| AutoForgeError::Unknown {
        kind: "command",
        name: name.to_string(),
    })?;

    if record.module_kind != ModuleKind::Command {
        return Err(AutoForgeError::Unknown {
            kind: "command",
            name: name.to_string(),
        });
    }

    if record.instance.is_none() {
        return Err(AutoForgeError::Unknown {
            kind: "command",
            name: name.to_string(),
        });
    }

    let args = match flat_args {
        Some(text) => shell_words::split(text).map_err(|e| AutoForgeError::ParseError {
            line: 0,
            message: format!("invalid command arguments: {e}"),
            context: text.to_string(),
        })?,
        None => Vec::new(),
    };

    LAST_OUTPUT.lock().unwrap().clear();
    match record.class_name.as_deref() {
        Some(class_name) => dispatch_command_by_class(ctx, class_name, &args, suppress_output).await,
        None => Err(AutoForgeError::Unknown {
            kind: "command",
            name: name.to_string(),
        }),
    }
}

/// Registry of concrete `Command` types known to the loader, keyed by `class_name`.
/// Kept separate from the generic [`register_commands`]/[`Registry`] bookkeeping so
/// that dispatch, like `execute_build`'s builder match, resolves to a concrete type
/// the loader knows how to call rather than a second trait-object cast through `Any`.
static KNOWN_COMMANDS: once_cell::sync::Lazy<std::sync::Mutex<Vec<Arc<dyn Command>>>> =
    once_cell::sync::Lazy::new(|| std::sync::Mutex::new(Vec::new()));

/// Make `command` dispatchable by [`execute_command`]. Call once per command during
/// startup, alongside [`register_commands`].
pub fn install_command(command: Arc<dyn Command>) {
    KNOWN_COMMANDS.lock().unwrap().push(command);
}

async fn dispatch_command_by_class(
    ctx: &Context,
    class_name: &str,
    args: &[String],
    suppress_output: bool,
) -> Result<i32> {
    let command = {
        let guard = KNOWN_COMMANDS.lock().unwrap();
        guard.iter().find(|c| c.name().eq_ignore_ascii_case(class_name)).cloned()
    };
    match command {
        Some(c) => {
            if suppress_output {
                c.execute(ctx, args, &CaptureOnlySink).await
            } else {
                c.execute(ctx, args, &TeeSink).await
            }
        }
        None => Err(AutoForgeError::Unknown {
            kind: "command",
            name: class_name.to_string(),
        }),
    }
}

/// Resolve `profile.tool_chain_data.build_system` as a registered `ModuleKind::Builder`
/// and run it. Mirrors `execute_build(build_profile)`.
#[instrument(skip(registry, profile), fields(build_system = %profile.tool_chain_data.build_system))]
pub async fn execute_build(registry: &Registry, profile: &BuildProfile) -> Result<BuildOutcome> {
    let build_system = profile.tool_chain_data.build_system.as_str();
    let record = registry.get_by_name(build_system, true).ok_or_else(|| AutoForgeError::Unknown {
        kind: "builder",
        name: build_system.to_string(),
    })?;

    if record.module_kind != ModuleKind::Builder {
        return Err(AutoForgeError::Unknown {
            kind: "builder",
            name: build_system.to_string(),
        });
    }

    let instance = record.instance.ok_or_else(|| AutoForgeError::Unknown {
        kind: "builder",
        name: build_system.to_string(),
    })?;

    match record.class_name.as_deref() {
        Some("CMakeBuilder") => {
            let concrete = instance
                .downcast::<CMakeBuilder>()
                .map_err(|_| AutoForgeError::Unknown {
                    kind: "builder",
                    name: build_system.to_string(),
                })?;
            builder::run_build(profile, concrete.as_ref() as &dyn Builder).await
        }
        Some("MakeBuilder") => {
            let concrete = instance
                .downcast::<MakeBuilder>()
                .map_err(|_| AutoForgeError::Unknown {
                    kind: "builder",
                    name: build_system.to_string(),
                })?;
            builder::run_build(profile, concrete.as_ref() as &dyn Builder).await
        }
        _ => Err(AutoForgeError::Unknown {
            kind: "builder",
            name: build_system.to_string(),
        }),
    }
}

/// Dev-only escape hatch: load metadata-only stub records from `*.json` manifest files
/// in `dir` (each `{ "name": ..., "description": ..., "kind": "command"|"builder" }`).
/// No code is loaded — Rust has no `importlib` equivalent — so records created this way
/// never carry an `instance` and can't be executed; they exist purely so local
/// development tooling can inspect what a future plugin layer's registry might look
/// like. Never called from the production CLI path (`spec.md` §9.1 item 3).
#[cfg(feature = "dev-scan")]
#[instrument(skip(registry))]
pub fn scan_manifest_directory(registry: &Registry, dir: &std::path::Path) -> Result<usize> {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Manifest {
        name: String,
        description: String,
        kind: String,
    }

    if !dir.exists() {
        warn!("Specified manifest directory not found: {}", dir.display());
        return Ok(0);
    }

    let mut loaded = 0usize;
    let entries = std::fs::read_dir(dir).map_err(|source| AutoForgeError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) => {
                warn!("Unable to read manifest '{}': {}. Skipping", path.display(), e);
                continue;
            }
        };
        let manifest: Manifest = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                warn!("Invalid manifest '{}': {}. Skipping", path.display(), e);
                continue;
            }
        };
        let kind = match manifest.kind.as_str() {
            "command" => ModuleKind::Command,
            "builder" => ModuleKind::Builder,
            _ => ModuleKind::Unknown,
        };
        let req = RegisterRequest {
            file_name: Some(path.clone()),
            ..Default::default()
        };
        match registry.register(&manifest.name, &manifest.description, kind, req) {
            Ok(_) => loaded += 1,
            Err(e) => warn!("Failed to register manifest '{}': {}", path.display(), e),
        }
    }

    if loaded == 0 {
        return Err(AutoForgeError::LoadError(vec![dir.display().to_string()]));
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_builtin_modules_populates_registry() {
        let registry = Registry::new();
        let count = register_builtin_modules(&registry).unwrap();
        assert_eq!(count, 2);
        assert!(registry.get_by_name("cmake", true).is_some());
        assert!(registry.get_by_name("make", true).is_some());
    }

    #[tokio::test]
    async fn execute_build_dispatches_to_registered_make_builder() {
        let registry = Registry::new();
        register_builtin_modules(&registry).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("out.bin");

        let mut required_tools = indexmap::IndexMap::new();
        required_tools.insert(
            "sh".to_string(),
            crate::solution::RequiredTool {
                path: None,
                version: None,
                options: vec![],
            },
        );

        let profile = BuildProfile {
            solution_name: "demo".to_string(),
            project_name: "proj".to_string(),
            config_name: "debug".to_string(),
            config_data: crate::solution::Configuration {
                name: "debug".to_string(),
                build_path: dir.path().join("build").display().to_string(),
                execute_from: None,
                compiler_options: vec!["-c".to_string(), format!("touch {}", artifact.display())],
                artifacts: vec![artifact.display().to_string()],
                pre_build_steps: indexmap::IndexMap::new(),
                post_build_steps: indexmap::IndexMap::new(),
                clean: None,
                board: None,
            },
            tool_chain_data: crate::solution::Toolchain {
                name: "host".to_string(),
                architecture: "host".to_string(),
                required_tools,
                build_system: "make".to_string(),
            },
            extra_args: vec![],
            terminal_leading_text: None,
        };

        // "make" is registered but the profile's compiler invocation uses `sh -c`
        // semantics via compiler_options, exercised through MakeBuilder directly.
        let outcome = execute_build(&registry, &profile).await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn execute_build_unknown_build_system_is_reported() {
        let registry = Registry::new();
        register_builtin_modules(&registry).unwrap();

        let profile = BuildProfile {
            solution_name: "demo".to_string(),
            project_name: "proj".to_string(),
            config_name: "debug".to_string(),
            config_data: crate::solution::Configuration::default(),
            tool_chain_data: crate::solution::Toolchain {
                name: "host".to_string(),
                architecture: "host".to_string(),
                required_tools: indexmap::IndexMap::new(),
                build_system: "bazel".to_string(),
            },
            extra_args: vec![],
            terminal_leading_text: None,
        };

        assert!(matches!(
            execute_build(&registry, &profile).await,
            Err(AutoForgeError::Unknown { .. })
        ));
    }

    struct EchoCommand;

    #[async_trait]
    impl Command for EchoCommand {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(&self, _ctx: &Context, args: &[String], sink: &dyn CommandOutputSink) -> Result<i32> {
            sink.on_line(&args.join(" "), false);
            Ok(0)
        }
    }

    #[tokio::test]
    async fn execute_command_tokenizes_args_and_captures_output() {
        let ctx = Context::new();
        register_commands(&ctx.registry, vec![Arc::new(EchoCommand)]).unwrap();

        let code = execute_command(&ctx, "echo", Some("hello 'quoted world'"), true)
            .await
            .unwrap();
        assert_eq!(code, 0);
        assert_eq!(last_output(), vec!["hello quoted world".to_string()]);
    }

    #[tokio::test]
    async fn execute_command_unknown_name_is_reported() {
        let ctx = Context::new();
        assert!(matches!(
            execute_command(&ctx, "missing", None, true).await,
            Err(AutoForgeError::Unknown { .. })
        ));
    }
}
