//! Explicit process context.
//!
//! The original implementation reached most services (registry, variable store,
//! telemetry, watchdog) through metaclass-enforced singletons (`CoreModuleInterface`,
//! `_SingletonABCMeta`) that any module could fetch with `get_instance()`. That makes
//! unit testing hard: two tests touching the same process share the same global state.
//!
//! `Context` is the replacement: one value, built once in `main`, holding the handles
//! every component needs. Library code takes `&Context` (or the individual handle it
//! needs) as a constructor argument instead of reaching for a global. Only the binary
//! crate is allowed to construct the "real" one; tests construct throwaway ones freely.

use crate::registry::Registry;
use crate::telemetry::Telemetry;
use crate::variable::VariableStore;
use crate::watchdog::Watchdog;
use std::sync::Arc;

/// Bundle of process-wide services threaded explicitly through constructors.
///
/// Cloning a `Context` is cheap — every field is an `Arc` over shared state.
#[derive(Clone)]
pub struct Context {
    pub registry: Arc<Registry>,
    pub variables: Arc<VariableStore>,
    pub telemetry: Arc<Telemetry>,
    pub watchdog: Arc<Watchdog>,
}

impl Context {
    /// Build a fresh context with empty/default services.
    ///
    /// This is the only constructor; there is no ambient `Context::global()`. Each
    /// caller (the CLI's `main`, or a test) owns the instance it creates.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            variables: Arc::new(VariableStore::new(Default::default())),
            telemetry: Arc::new(Telemetry::new()),
            watchdog: Arc::new(Watchdog::new()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_contexts_are_independent() {
        let a = Context::new();
        let b = Context::new();

        a.variables
            .add(
                "A",
                "1",
                crate::variable::VariableOptions::default(),
            )
            .unwrap();

        assert!(a.variables.get("A", false).is_ok());
        assert!(b.variables.get("A", false).is_err());
    }
}
