//! Module Registry (C4): a process-wide catalog of named modules (core services,
//! commands, builders) with metadata and instance retrieval.
//!
//! Grounded on the original `Registry` class's case-insensitive name/method lookups,
//! and structurally on the teacher codebase's static `PluginManager` (a
//! `RwLock`-guarded table behind a handful of narrow methods) rather than that
//! module's `OnceLock` globals — see [`crate::context::Context`] for why this is an
//! owned value instead of a process-wide static.

use crate::errors::{AutoForgeError, Result};
use indexmap::IndexMap;
use std::any::Any;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, instrument};

/// Categorizes a [`ModuleRecord`]. See `spec.md` GLOSSARY "Module Kind".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Core,
    Command,
    Builder,
    Common,
    Unknown,
}

/// Metadata and (optionally) a live instance for one registered module.
///
/// `instance` is `Arc<dyn Any + Send + Sync>` rather than a concrete trait object
/// because the registry catalogs modules of every kind uniformly; kind-specific code
/// (the Dynamic Loader, C5) downcasts to the trait it expects (`Command`, `Builder`).
#[derive(Clone)]
pub struct ModuleRecord {
    pub name: String,
    pub description: String,
    pub class_name: Option<String>,
    pub instance: Option<Arc<dyn Any + Send + Sync>>,
    pub class_interface_name: Option<String>,
    pub module_kind: ModuleKind,
    pub version: Option<String>,
    pub file_name: Option<PathBuf>,
    pub hidden: bool,
    pub command_type: Option<String>,
}

impl std::fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("class_name", &self.class_name)
            .field("module_kind", &self.module_kind)
            .field("version", &self.version)
            .field("file_name", &self.file_name)
            .field("hidden", &self.hidden)
            .field("command_type", &self.command_type)
            .finish()
    }
}

/// Registration parameters for [`Registry::register`].
#[derive(Default)]
pub struct RegisterRequest {
    pub class_name: Option<String>,
    pub instance: Option<Arc<dyn Any + Send + Sync>>,
    pub class_interface_name: Option<String>,
    pub version: Option<String>,
    pub file_name: Option<PathBuf>,
    pub hidden: bool,
    pub command_type: Option<String>,
}

/// Partial update accepted by [`Registry::update`]. Every field left `None` is left
/// untouched on the existing record.
#[derive(Default)]
pub struct RegistryUpdate {
    pub description: Option<String>,
    pub class_name: Option<String>,
    pub instance: Option<Arc<dyn Any + Send + Sync>>,
    pub class_interface_name: Option<String>,
    pub version: Option<String>,
    pub file_name: Option<PathBuf>,
    pub hidden: Option<bool>,
}

pub struct Registry {
    /// Keyed by lowercased name for case-insensitive uniqueness; the record itself
    /// keeps the originally-registered casing.
    entries: RwLock<IndexMap<String, ModuleRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
        }
    }

    /// Register a new module. Fails with [`AutoForgeError::Duplicate`] on a
    /// case-insensitive name collision.
    #[instrument(skip(self, description, req), fields(name = %name))]
    pub fn register(
        &self,
        name: &str,
        description: &str,
        kind: ModuleKind,
        req: RegisterRequest,
    ) -> Result<ModuleRecord> {
        let key = name.to_lowercase();
        let mut guard = self.entries.write().unwrap();

        if guard.contains_key(&key) {
            return Err(AutoForgeError::Duplicate {
                kind: "module",
                name: name.to_string(),
            });
        }

        let record = ModuleRecord {
            name: name.to_string(),
            description: description.to_string(),
            class_name: req.class_name,
            instance: req.instance,
            class_interface_name: req.class_interface_name,
            module_kind: kind,
            version: req.version,
            file_name: req.file_name,
            hidden: req.hidden,
            command_type: req.command_type,
        };

        debug!("Registered module '{}' ({:?})", name, kind);
        guard.insert(key, record.clone());
        Ok(record)
    }

    /// Apply a partial update to an existing record. Fails with
    /// [`AutoForgeError::Unknown`] if `name` is not registered.
    pub fn update(&self, name: &str, update: RegistryUpdate) -> Result<ModuleRecord> {
        let key = name.to_lowercase();
        let mut guard = self.entries.write().unwrap();
        let record = guard.get_mut(&key).ok_or_else(|| AutoForgeError::Unknown {
            kind: "module",
            name: name.to_string(),
        })?;

        if let Some(v) = update.description {
            record.description = v;
        }
        if let Some(v) = update.class_name {
            record.class_name = Some(v);
        }
        if let Some(v) = update.instance {
            record.instance = Some(v);
        }
        if let Some(v) = update.class_interface_name {
            record.class_interface_name = Some(v);
        }
        if let Some(v) = update.version {
            record.version = Some(v);
        }
        if let Some(v) = update.file_name {
            record.file_name = Some(v);
        }
        if let Some(v) = update.hidden {
            record.hidden = v;
        }

        Ok(record.clone())
    }

    /// Look up a record by name. `ci` selects case-insensitive matching; the registry
    /// is always keyed case-insensitively internally, so this only affects whether a
    /// differently-cased `name` argument is accepted.
    pub fn get_by_name(&self, name: &str, ci: bool) -> Option<ModuleRecord> {
        let guard = self.entries.read().unwrap();
        let key = name.to_lowercase();
        let record = guard.get(&key)?;
        if !ci && record.name != name {
            return None;
        }
        Some(record.clone())
    }

    /// All records of a given kind, in registration order.
    pub fn list_by_kind(&self, kind: ModuleKind) -> Vec<ModuleRecord> {
        let guard = self.entries.read().unwrap();
        guard
            .values()
            .filter(|r| r.module_kind == kind)
            .cloned()
            .collect()
    }

    /// Resolve a dotted `"ClassName.method"` reference to the owning record and the
    /// normalized method name. Matching is case-insensitive on both components.
    ///
    /// Unlike the original's runtime attribute lookup, this does not itself invoke
    /// anything — callers (the Dynamic Loader) downcast `record.instance` to the
    /// trait they expect and call `method_name` on it themselves.
    pub fn find_callable(&self, dotted: &str) -> Result<(ModuleRecord, String)> {
        let (class_part, method_part) = dotted.split_once('.').ok_or_else(|| AutoForgeError::Unknown {
            kind: "callable",
            name: dotted.to_string(),
        })?;

        let guard = self.entries.read().unwrap();
        let record = guard
            .values()
            .find(|r| {
                r.class_name
                    .as_deref()
                    .map(|c| c.eq_ignore_ascii_case(class_part))
                    .unwrap_or(false)
            })
            .ok_or_else(|| AutoForgeError::Unknown {
                kind: "class",
                name: class_part.to_string(),
            })?;

        Ok((record.clone(), method_part.to_string()))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup_case_insensitive() {
        let reg = Registry::new();
        reg.register("CMake", "cmake builder", ModuleKind::Builder, RegisterRequest::default())
            .unwrap();

        assert!(reg.get_by_name("cmake", true).is_some());
        assert!(reg.get_by_name("cmake", false).is_none());
        assert!(reg.get_by_name("CMake", false).is_some());
    }

    #[test]
    fn duplicate_registration_fails() {
        let reg = Registry::new();
        reg.register("a", "first", ModuleKind::Command, RegisterRequest::default())
            .unwrap();
        let err = reg.register("A", "second", ModuleKind::Command, RegisterRequest::default());
        assert!(matches!(err, Err(AutoForgeError::Duplicate { .. })));
    }

    #[test]
    fn update_unknown_fails() {
        let reg = Registry::new();
        let err = reg.update("missing", RegistryUpdate::default());
        assert!(matches!(err, Err(AutoForgeError::Unknown { .. })));
    }

    #[test]
    fn list_by_kind_filters() {
        let reg = Registry::new();
        reg.register("cmake", "", ModuleKind::Builder, RegisterRequest::default())
            .unwrap();
        reg.register("make", "", ModuleKind::Builder, RegisterRequest::default())
            .unwrap();
        reg.register("build", "", ModuleKind::Command, RegisterRequest::default())
            .unwrap();

        assert_eq!(reg.list_by_kind(ModuleKind::Builder).len(), 2);
        assert_eq!(reg.list_by_kind(ModuleKind::Command).len(), 1);
    }

    #[test]
    fn find_callable_resolves_case_insensitively() {
        let reg = Registry::new();
        reg.register(
            "cmake",
            "",
            ModuleKind::Builder,
            RegisterRequest {
                class_name: Some("CMakeBuilder".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let (record, method) = reg.find_callable("cmakebuilder.Build").unwrap();
        assert_eq!(record.name, "cmake");
        assert_eq!(method, "Build");
    }
}
