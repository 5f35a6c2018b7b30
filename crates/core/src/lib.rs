//! Core library for the AutoForge build orchestration engine.
//!
//! This crate holds every component of the engine: config preprocessing, the
//! variable store, the solution model, the module registry and dynamic loader,
//! toolchain resolution, shell execution, the builder state machine, telemetry, and
//! the watchdog. The `autoforge` binary crate is a thin CLI wrapper over this library.

pub mod builder;
pub mod context;
pub mod errors;
pub mod io;
pub mod jsonc;
pub mod loader;
pub mod logging;
pub mod registry;
pub mod shell;
pub mod solution;
pub mod telemetry;
pub mod toolchain;
pub mod variable;
pub mod watchdog;

pub use indexmap::IndexMap;

/// Get the version of the core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let version = version();
        assert!(!version.is_empty());
        assert!(version.contains('.'));
    }
}
