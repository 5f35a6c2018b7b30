//! Error types for the AutoForge core engine.
//!
//! A single flat `thiserror` enum covers the taxonomy described for the build
//! orchestration engine: configuration parsing, variable resolution, registry/loader
//! failures, toolchain validation, shell execution, and the builder state machine.

use std::path::PathBuf;
use thiserror::Error;

/// Domain errors produced by the AutoForge core engine.
#[derive(Error, Debug)]
pub enum AutoForgeError {
    /// JSONC/solution parse failure, with 1-based line and surrounding context.
    #[error("Parse error at line {line}: {message}\n{context}")]
    ParseError {
        line: usize,
        message: String,
        context: String,
    },

    /// Solution or variable file could not be found under either extension.
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// I/O failure reading a configuration or solution file.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A variable reference or environment token could not be resolved.
    #[error("Unresolved reference: {reference}")]
    Unresolved { reference: String },

    /// Attempted to add a record (variable, registry entry) that already exists.
    #[error("Duplicate {kind} name: {name}")]
    Duplicate { kind: &'static str, name: String },

    /// Looked up a record (variable, registry entry) that does not exist.
    #[error("Unknown {kind}: {name}")]
    Unknown { kind: &'static str, name: String },

    /// A path-backed variable violated its existence policy.
    #[error("Path variable '{name}' does not exist: {path}")]
    MissingPath { name: String, path: PathBuf },

    /// Unknown project or configuration name requested from the Solution Model.
    #[error("Unknown project: {name}")]
    UnknownProject { name: String },

    #[error("Unknown configuration '{configuration}' in project '{project}'")]
    UnknownConfiguration {
        project: String,
        configuration: String,
    },

    /// A required tool could not be resolved on PATH or at an explicit path.
    #[error("Required tool '{tool}' not found")]
    ToolMissing { tool: String },

    /// `tool --version` output did not match any known version pattern.
    #[error("Could not parse a version number from '{tool}' output: {output}")]
    VersionUnparseable { tool: String, output: String },

    /// A resolved tool version did not satisfy its declared constraint.
    #[error("Tool '{tool}' version {found} does not satisfy constraint {constraint}")]
    VersionUnsatisfied {
        tool: String,
        found: String,
        constraint: String,
    },

    /// Toolchain-level validation failed (conflicting `build_system`, etc).
    #[error("Toolchain invalid: {message}")]
    ToolchainInvalid { message: String },

    /// A build step (configure/build/clean/post-build) returned a nonzero exit code.
    #[error("Step '{step}' failed with exit code {exit_code}: {stderr_tail}")]
    StepFailed {
        step: String,
        exit_code: i32,
        stderr_tail: String,
    },

    /// One or more declared artifacts were missing after a build completed.
    #[error("Missing artifacts: {}", .0.join(", "))]
    MissingArtifacts(Vec<String>),

    /// The build or shell invocation was cancelled cooperatively.
    #[error("Cancelled")]
    Cancelled,

    /// A shell invocation exceeded its timeout.
    #[error("Timed out after {0:?}")]
    TimedOut(std::time::Duration),

    /// Successful early termination, not a failure (e.g. `--clean` stopping the build).
    #[error("{message}")]
    ExitEarly { exit_code: i32, message: String },

    /// Plugin/module loading failed across every scanned directory.
    #[error("Failed to load any plugin from: {}", .0.join(", "))]
    LoadError(Vec<String>),
}

impl AutoForgeError {
    /// Process exit code this error maps to, per `spec.md` §6 "Exit codes".
    ///
    /// Most variants are ordinary build-time failures (`1`); the handful the CLI
    /// surface distinguishes get their own code so a caller (CI, a wrapper script) can
    /// branch on *why* a build failed without parsing the message.
    pub fn exit_code(&self) -> i32 {
        match self {
            AutoForgeError::ToolchainInvalid { .. }
            | AutoForgeError::ToolMissing { .. }
            | AutoForgeError::VersionUnparseable { .. }
            | AutoForgeError::VersionUnsatisfied { .. } => 2,
            AutoForgeError::MissingArtifacts(_) => 3,
            AutoForgeError::Cancelled => 4,
            _ => 1,
        }
    }
}

/// Convenience alias for Results using [`AutoForgeError`].
pub type Result<T> = std::result::Result<T, AutoForgeError>;

/// Normalize a failure message for user-visible output: trimmed, capitalized, and
/// terminated with a period (`spec.md` §7 "User-visible failure").
pub fn normalize_message(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let mut chars = trimmed.chars();
    let mut capitalized: String = match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    };
    if !capitalized.ends_with('.') {
        capitalized.push('.');
    }
    capitalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_message_trims_capitalizes_and_dots() {
        assert_eq!(normalize_message("  build stopped after clean"), "Build stopped after clean.");
        assert_eq!(normalize_message("already done."), "Already done.");
    }

    #[test]
    fn exit_codes_match_taxonomy() {
        assert_eq!(AutoForgeError::ToolMissing { tool: "cmake".into() }.exit_code(), 2);
        assert_eq!(AutoForgeError::MissingArtifacts(vec!["a".into()]).exit_code(), 3);
        assert_eq!(AutoForgeError::Cancelled.exit_code(), 4);
        assert_eq!(
            AutoForgeError::StepFailed {
                step: "build".into(),
                exit_code: 1,
                stderr_tail: String::new(),
            }
            .exit_code(),
            1
        );
    }
}
