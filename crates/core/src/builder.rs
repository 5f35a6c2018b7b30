//! Builder Engine (C8): drives one project/configuration through a build-system
//! state machine (configure, build, clean, pre/post steps, artifact verification).
//!
//! Grounded on `builders/cmake_builder.py` (`CMakeBuilder`, `_CMakeBuildStep`,
//! `_set_state`, `_process_build_steps`, `_execute_single_step`) and
//! `builders/make_builder.py` (`MakeBuilder`, `_make_configuration`,
//! `_validate_tool_chain`). The original's `ExitBuildEarly` exception is the
//! `spec.md` §9 redesign target: early/clean-stop termination is represented here as
//! a [`BuildOutcome`] variant returned from `build()`, not raised and caught.

use crate::errors::{normalize_message, AutoForgeError, Result};
use crate::shell::{execute, CommandLine, EchoSink, ExecRequest, LineSink, SingleLineSink};
use crate::solution::{Configuration, Toolchain};
use crate::toolchain::{self, ResolvedToolchain};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

/// Build-system state, entered in order. Mirrors `_CMakeBuildStep`; `MakeBuilder` only
/// ever passes through `PreConfigure` -> `PreBuild` -> `Build` -> `DoneBuild` since it
/// has no separate configure phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildState {
    PreConfigure,
    Configure,
    PreBuild,
    Build,
    PostBuild,
    DoneBuild,
}

/// Everything one [`Builder::build`] call needs: which project/configuration this is,
/// the configuration and toolchain data it was declared with, and any trailing CLI
/// arguments (`--clean`, `--clean_build`, or opaque `key=value` pairs forwarded to
/// build steps).
#[derive(Debug, Clone)]
pub struct BuildProfile {
    pub solution_name: String,
    pub project_name: String,
    pub config_name: String,
    pub config_data: Configuration,
    pub tool_chain_data: Toolchain,
    pub extra_args: Vec<String>,
    pub terminal_leading_text: Option<String>,
}

/// Result of a full [`Builder::build`] call. A clean-only run (`--clean` with a
/// zero exit code) is [`BuildOutcome::EarlyExit`], not an error.
#[derive(Debug)]
pub enum BuildOutcome {
    Success { return_code: i32 },
    EarlyExit { exit_code: i32, message: String },
    Failed { message: String, exit_code: i32 },
}

/// Shared services a [`Builder`] needs beyond its own state: the resolved toolchain
/// (tool paths, already version-checked) and somewhere to render build output.
pub struct BuilderContext<'a> {
    pub resolved: &'a ResolvedToolchain,
}

/// One build-system backend, registered into the Module Registry at
/// `ModuleKind::Builder` (see `spec.md` §4.8.1).
#[async_trait]
pub trait Builder: Send + Sync {
    fn build_system(&self) -> &str;
    async fn build(&self, profile: &BuildProfile, ctx: &BuilderContext<'_>) -> BuildOutcome;
}


fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') {
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(format!("{home}{rest}"));
            }
        }
    }
    PathBuf::from(path)
}

/// Execute one named step (a pre/post-build step, or the `clean` directive). Only
/// steps prefixed with `!` actually run (`_execute_single_step`); anything else is a
/// warning, not an error.
async fn execute_single_step(command: &str, name: &str) -> i32 {
    let Some(stripped) = command.strip_prefix('!') else {
        warn!("Step '{}' ignored: no '!' prefix", name);
        return 0;
    };
    let sink = SingleLineSink;
    let req = ExecRequest::new(CommandLine::Shell(stripped.trim_start().to_string()), &sink);
    match execute(req).await {
        Ok(result) => result.return_code,
        Err(e) => {
            error!("Failed to execute '{}': {}", name, e);
            1
        }
    }
}

async fn process_build_steps(steps: &indexmap::IndexMap<String, String>, is_pre: bool) {
    let phase = if is_pre { "pre" } else { "post" };
    for (step_name, command) in steps {
        info!("Running {}-build step: '{}'", phase, step_name);
        execute_single_step(command.trim(), step_name).await;
    }
}

/// `--clean`/`--clean_build` handling, entered only while `state == PreBuild`, per
/// `_set_state`. A bare `--clean` with a zero exit code stops the build
/// ([`BuildOutcome::EarlyExit`]); `--clean_build` runs the clean step and continues.
async fn apply_clean_directive(
    state: BuildState,
    extra_args: &[String],
    clean_command: Option<&str>,
) -> Result<Option<BuildOutcome>> {
    if state != BuildState::PreBuild {
        return Ok(None);
    }
    let Some(arg) = extra_args.iter().find(|a| a.as_str() == "--clean" || a.as_str() == "--clean_build") else {
        return Ok(None);
    };
    let Some(clean_command) = clean_command else {
        return Ok(None);
    };

    let exit_code = execute_single_step(clean_command, arg).await;
    if arg == "--clean" && exit_code == 0 {
        return Ok(Some(BuildOutcome::EarlyExit {
            exit_code,
            message: normalize_message("Build stopped after clean"),
        }));
    }
    if exit_code != 0 {
        return Err(AutoForgeError::StepFailed {
            step: arg.clone(),
            exit_code,
            stderr_tail: String::new(),
        });
    }
    Ok(None)
}

fn verify_artifacts(artifacts: &[String]) -> Result<()> {
    let mut missing = Vec::new();
    for artifact in artifacts {
        let path = Path::new(artifact);
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().unwrap_or_default().join(path)
        };
        match resolved.metadata() {
            Ok(meta) => {
                let size = bytesize::ByteSize(meta.len());
                info!(
                    "Artifact '{}' created, size: {}",
                    resolved.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
                    size
                );
            }
            Err(_) => missing.push(resolved.display().to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(AutoForgeError::MissingArtifacts(missing));
    }
    Ok(())
}

/// Determine whether `command_line[0]` invokes CMake in configure mode (as opposed to
/// a subsequent `cmake --build`). Mirrors `_is_cmake_configuration_command`: presence
/// of `-G`/`-S`/`-B`, or any `-D` define.
fn is_cmake_configuration_command(command_line: &[String]) -> bool {
    let is_cmake = command_line.first().map(|c| c.contains("cmake")).unwrap_or(false);
    let has_layout_flag = command_line.iter().any(|a| a == "-G" || a == "-S" || a == "-B");
    let has_define = command_line.iter().any(|a| a.starts_with("-D"));
    is_cmake && (has_layout_flag || has_define)
}

/// CMake (optionally Ninja two-phase) builder. See module docs.
pub struct CMakeBuilder;

#[async_trait]
impl Builder for CMakeBuilder {
    fn build_system(&self) -> &str {
        "cmake"
    }

    #[instrument(skip(self, profile, ctx), fields(project = %profile.project_name, config = %profile.config_name))]
    async fn build(&self, profile: &BuildProfile, ctx: &BuilderContext<'_>) -> BuildOutcome {
        match self.run(profile, ctx).await {
            Ok(outcome) => outcome,
            Err(AutoForgeError::ExitEarly { exit_code, message }) => BuildOutcome::EarlyExit {
                exit_code,
                message: normalize_message(&message),
            },
            Err(e) => BuildOutcome::Failed {
                exit_code: e.exit_code(),
                message: normalize_message(&e.to_string()),
            },
        }
    }
}

impl CMakeBuilder {
    async fn run(&self, profile: &BuildProfile, ctx: &BuilderContext<'_>) -> Result<BuildOutcome> {
        let config = &profile.config_data;

        let execute_from = match &config.execute_from {
            Some(p) => {
                let resolved = expand_path(p);
                if !resolved.is_dir() {
                    return Err(AutoForgeError::ToolchainInvalid {
                        message: format!("invalid source directory: '{}'", resolved.display()),
                    });
                }
                Some(resolved)
            }
            None => None,
        };

        let cmake_path = ctx
            .resolved
            .get_tool("cmake")
            .ok_or_else(|| AutoForgeError::ToolMissing { tool: "cmake".to_string() })?
            .clone();
        let ninja_path = ctx.resolved.get_tool("ninja").cloned();

        if let Some(outcome) = apply_clean_directive(BuildState::PreConfigure, &profile.extra_args, config.clean.as_deref()).await? {
            return Ok(outcome);
        }

        if !config.pre_build_steps.is_empty() {
            process_build_steps(&config.pre_build_steps, true).await;
        }

        let build_path = expand_path(&config.build_path);
        if !build_path.exists() {
            std::fs::create_dir_all(&build_path).map_err(|source| AutoForgeError::Io {
                path: build_path.clone(),
                source,
            })?;
        }
        if !build_path.is_dir() {
            return Err(AutoForgeError::ToolchainInvalid {
                message: format!("build path is not a directory: '{}'", build_path.display()),
            });
        }

        let cmake_options = ctx.resolved.get_tool_options("cmake");
        let mut merged_options: Vec<String> = cmake_options.to_vec();
        merged_options.extend(config.compiler_options.iter().cloned());

        let mut command_line = vec![cmake_path.to_string_lossy().to_string()];
        command_line.extend(merged_options);
        let is_config_step = is_cmake_configuration_command(&command_line);

        let sink = LineSink {
            leading_text: profile.terminal_leading_text.clone(),
        };
        let mut req = ExecRequest::new(CommandLine::Tokens(command_line), &sink);
        req.cwd = execute_from.clone();
        let result = execute(req).await?;
        if result.return_code != 0 {
            return Err(AutoForgeError::StepFailed {
                step: "configure".to_string(),
                exit_code: result.return_code,
                stderr_tail: result.stderr_captured,
            });
        }

        if let Some(outcome) = apply_clean_directive(BuildState::PreBuild, &profile.extra_args, config.clean.as_deref()).await? {
            return Ok(outcome);
        }

        if is_config_step {
            if let Some(ninja_path) = ninja_path {
                let ninja_command = format!("{} -C {}", ninja_path.display(), build_path.display());
                let sink = LineSink {
                    leading_text: profile.terminal_leading_text.clone(),
                };
                let mut req = ExecRequest::new(CommandLine::Shell(ninja_command), &sink);
                req.cwd = execute_from.clone();
                let result = execute(req).await?;
                if result.return_code != 0 {
                    return Err(AutoForgeError::StepFailed {
                        step: "build".to_string(),
                        exit_code: result.return_code,
                        stderr_tail: result.stderr_captured,
                    });
                }
            }
        }

        if !config.post_build_steps.is_empty() {
            process_build_steps(&config.post_build_steps, false).await;
        }

        verify_artifacts(&config.artifacts)?;

        info!(
            "Building of '{}/{}' was successful",
            profile.project_name, profile.config_name
        );
        Ok(BuildOutcome::Success { return_code: 0 })
    }
}

/// Plain `make`/cross-compiler builder; no separate configure phase.
pub struct MakeBuilder;

#[async_trait]
impl Builder for MakeBuilder {
    fn build_system(&self) -> &str {
        "make"
    }

    #[instrument(skip(self, profile, ctx), fields(project = %profile.project_name, config = %profile.config_name))]
    async fn build(&self, profile: &BuildProfile, ctx: &BuilderContext<'_>) -> BuildOutcome {
        match self.run(profile, ctx).await {
            Ok(outcome) => outcome,
            Err(AutoForgeError::ExitEarly { exit_code, message }) => BuildOutcome::EarlyExit {
                exit_code,
                message: normalize_message(&message),
            },
            Err(e) => BuildOutcome::Failed {
                exit_code: e.exit_code(),
                message: normalize_message(&e.to_string()),
            },
        }
    }
}

impl MakeBuilder {
    async fn run(&self, profile: &BuildProfile, ctx: &BuilderContext<'_>) -> Result<BuildOutcome> {
        let config = &profile.config_data;

        let build_system = ctx
            .resolved
            .get_value("build_system")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AutoForgeError::ToolchainInvalid {
                message: "toolchain does not specify a 'build_system' (e.g., 'make')".to_string(),
            })?
            .to_string();
        // Prefer the resolved (validated, version-checked) tool path when the
        // toolchain declares `build_system` as one of its `required_tools`; fall back
        // to the bare name so a PATH-only `make` keeps working for toolchains that
        // only validate their compiler/linker, not `make` itself.
        let compiler_command = ctx
            .resolved
            .get_tool(&build_system)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or(build_system);

        let execute_from = match &config.execute_from {
            Some(p) => {
                let resolved = expand_path(p);
                if !resolved.is_dir() {
                    return Err(AutoForgeError::ToolchainInvalid {
                        message: format!("invalid source directory: '{}'", resolved.display()),
                    });
                }
                Some(resolved)
            }
            None => None,
        };

        if let Some(outcome) = apply_clean_directive(BuildState::PreBuild, &profile.extra_args, config.clean.as_deref()).await? {
            return Ok(outcome);
        }

        if !config.pre_build_steps.is_empty() {
            process_build_steps(&config.pre_build_steps, true).await;
        }

        let build_path = expand_path(&config.build_path);
        if !build_path.exists() {
            std::fs::create_dir_all(&build_path).map_err(|source| AutoForgeError::Io {
                path: build_path.clone(),
                source,
            })?;
        }
        if !build_path.is_dir() {
            return Err(AutoForgeError::ToolchainInvalid {
                message: format!("build path is not a directory: '{}'", build_path.display()),
            });
        }

        let mut command_line = vec![compiler_command];
        command_line.extend(config.compiler_options.iter().cloned());

        let sink = LineSink {
            leading_text: profile.terminal_leading_text.clone(),
        };
        let mut req = ExecRequest::new(CommandLine::Tokens(command_line), &sink);
        req.cwd = execute_from;
        let result = execute(req).await?;
        if result.return_code != 0 {
            return Err(AutoForgeError::StepFailed {
                step: "build".to_string(),
                exit_code: result.return_code,
                stderr_tail: result.stderr_captured,
            });
        }

        if !config.post_build_steps.is_empty() {
            process_build_steps(&config.post_build_steps, false).await;
        }

        verify_artifacts(&config.artifacts)?;

        info!("Build succeeded");
        Ok(BuildOutcome::Success { return_code: 0 })
    }
}

/// Resolve the toolchain declared by `profile.tool_chain_data`, then dispatch to the
/// `Builder` registered for its `build_system` (`spec.md` §9.1 item 1: the toolchain's
/// `build_system` is authoritative).
pub async fn run_build(profile: &BuildProfile, builder: &dyn Builder) -> Result<BuildOutcome> {
    if builder.build_system() != profile.tool_chain_data.build_system {
        return Err(AutoForgeError::ToolchainInvalid {
            message: format!(
                "toolchain declares build_system '{}' but builder '{}' was selected",
                profile.tool_chain_data.build_system,
                builder.build_system()
            ),
        });
    }
    let resolved = toolchain::resolve(&profile.tool_chain_data).await?;
    let ctx = BuilderContext { resolved: &resolved };
    Ok(builder.build(profile, &ctx).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solution::RequiredTool;
    use indexmap::IndexMap;

    fn sample_toolchain(build_system: &str) -> Toolchain {
        let mut required_tools = IndexMap::new();
        required_tools.insert(
            "sh".to_string(),
            RequiredTool {
                path: None,
                version: None,
                options: vec![],
            },
        );
        Toolchain {
            name: "host".to_string(),
            architecture: "host".to_string(),
            required_tools,
            build_system: build_system.to_string(),
        }
    }

    fn sample_profile(build_path: &Path, artifact: &Path, build_system: &str) -> BuildProfile {
        BuildProfile {
            solution_name: "demo".to_string(),
            project_name: "zephyr".to_string(),
            config_name: "debug".to_string(),
            config_data: Configuration {
                name: "debug".to_string(),
                build_path: build_path.display().to_string(),
                execute_from: None,
                compiler_options: vec![format!("-c"), format!("touch {} && exit 0", artifact.display())],
                artifacts: vec![artifact.display().to_string()],
                pre_build_steps: IndexMap::new(),
                post_build_steps: IndexMap::new(),
                clean: None,
                board: None,
            },
            tool_chain_data: sample_toolchain(build_system),
            extra_args: vec![],
            terminal_leading_text: None,
        }
    }

    #[test]
    fn normalizes_message_trims_capitalizes_and_dots() {
        assert_eq!(normalize_message("  build stopped after clean"), "Build stopped after clean.");
        assert_eq!(normalize_message("already done."), "Already done.");
    }

    #[test]
    fn detects_cmake_configuration_command() {
        let cmd = vec!["/usr/bin/cmake".to_string(), "-S".to_string(), ".".to_string(), "-B".to_string(), "build".to_string()];
        assert!(is_cmake_configuration_command(&cmd));

        let build_cmd = vec!["/usr/bin/cmake".to_string(), "--build".to_string(), "build".to_string()];
        assert!(!is_cmake_configuration_command(&build_cmd));
    }

    #[tokio::test]
    async fn make_builder_runs_build_and_verifies_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let build_path = dir.path().join("build");
        let artifact = dir.path().join("out.bin");

        let mut profile = sample_profile(&build_path, &artifact, "make");
        profile.config_data.compiler_options = vec!["-c".to_string(), format!("touch {}", artifact.display())];
        profile.tool_chain_data.build_system = "sh".to_string();

        let resolved = toolchain::resolve(&profile.tool_chain_data).await.unwrap();
        let ctx = BuilderContext { resolved: &resolved };

        let builder = MakeBuilder;
        let outcome = builder.run(&profile, &ctx).await.unwrap();
        assert!(matches!(outcome, BuildOutcome::Success { return_code: 0 }));
        assert!(artifact.exists());
    }

    #[tokio::test]
    async fn make_builder_reports_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let build_path = dir.path().join("build");
        let artifact = dir.path().join("never-created.bin");

        let mut profile = sample_profile(&build_path, &artifact, "sh");
        profile.config_data.compiler_options = vec!["-c".to_string(), "true".to_string()];

        let resolved = toolchain::resolve(&profile.tool_chain_data).await.unwrap();
        let ctx = BuilderContext { resolved: &resolved };

        let builder = MakeBuilder;
        let result = builder.run(&profile, &ctx).await;
        assert!(matches!(result, Err(AutoForgeError::MissingArtifacts(_))));
    }

    #[tokio::test]
    async fn clean_only_run_exits_early() {
        let dir = tempfile::tempdir().unwrap();
        let build_path = dir.path().join("build");
        let artifact = dir.path().join("out.bin");

        let mut profile = sample_profile(&build_path, &artifact, "sh");
        profile.config_data.clean = Some("!true".to_string());
        profile.extra_args = vec!["--clean".to_string()];

        let resolved = toolchain::resolve(&profile.tool_chain_data).await.unwrap();
        let ctx = BuilderContext { resolved: &resolved };

        let builder = MakeBuilder;
        let outcome = builder.build(&profile, &ctx).await;
        assert!(matches!(outcome, BuildOutcome::EarlyExit { exit_code: 0, .. }));
    }
}
