//! Variable Store (C2): an ordered, uniquely-keyed mapping of named values with
//! `<$ref_NAME>` reference expansion, environment/home interpolation, and a
//! path-existence policy.
//!
//! Reference expansion is modeled as a walk over a dependency DAG rather than the
//! "substitute and retry until nothing changes" loop the original implementation used:
//! each variable is resolved at most once per `expand()` call (memoized), and a name
//! that is re-entered while still being resolved is a cycle, reported immediately as
//! [`AutoForgeError::Unresolved`] instead of being inferred from a "no progress" check.

use crate::errors::{AutoForgeError, Result};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::RwLock;
use tracing::{debug, instrument, warn};

/// `<$ref_NAME>` — the reference token syntax understood by [`VariableStore::expand`].
static REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\$ref_([A-Za-z_][A-Za-z0-9_]*)>").expect("valid regex"));

/// `$VAR` or `${VAR}` — environment variable interpolation, applied after reference
/// expansion.
static ENV_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex"));

/// A stored variable record. See `spec.md` §3 "Variable".
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub base_name: String,
    pub description: Option<String>,
    pub value: String,
    pub is_path: bool,
    pub path_must_exist: bool,
    pub create_path_if_not_exist: bool,
    pub folder_type: Option<String>,
    pub extras: IndexMap<String, serde_json::Value>,
}

/// Options accepted by [`VariableStore::add`].
#[derive(Debug, Clone, Default)]
pub struct VariableOptions {
    pub description: Option<String>,
    pub is_path: bool,
    pub path_must_exist: bool,
    pub create_path_if_not_exist: bool,
    pub folder_type: Option<String>,
    pub extras: IndexMap<String, serde_json::Value>,
}

/// Store-wide normalization policy, set once at construction from the solution's
/// `auto_prefix` / `force_upper_case_names` keys (`spec.md` §6).
#[derive(Debug, Clone, Default)]
pub struct VariableStoreConfig {
    /// Prefix injected into names that don't already carry it. `None` disables prefixing.
    pub auto_prefix: Option<String>,
    pub force_upper_case_names: bool,
}

struct Inner {
    /// Insertion-normalized order, used by `export()`.
    entries: IndexMap<String, Variable>,
    /// Kept sorted for O(log N) membership checks, mirroring the binary-search lookup
    /// strategy of the original implementation.
    sorted_names: Vec<String>,
}

/// Thread-safe variable store. Readers run concurrently; writers are serialized behind
/// a single `RwLock`.
pub struct VariableStore {
    config: VariableStoreConfig,
    inner: RwLock<Inner>,
}

impl VariableStore {
    pub fn new(config: VariableStoreConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                entries: IndexMap::new(),
                sorted_names: Vec::new(),
            }),
        }
    }

    fn normalize_name(&self, name: &str) -> String {
        let mut normalized = name.to_string();
        if let Some(prefix) = &self.config.auto_prefix {
            if !normalized.starts_with(prefix.as_str()) {
                normalized = format!("{prefix}{normalized}");
            }
        }
        if self.config.force_upper_case_names {
            normalized = normalized.to_uppercase();
        }
        normalized
    }

    /// Add a new variable. Fails with [`AutoForgeError::Duplicate`] if the normalized
    /// name already exists, or [`AutoForgeError::MissingPath`] when `path_must_exist`
    /// is set, `create_path_if_not_exist` is not, and the path does not exist.
    #[instrument(skip(self, opts), fields(name = %name))]
    pub fn add(&self, name: &str, value: &str, opts: VariableOptions) -> Result<Variable> {
        let normalized = self.normalize_name(name);
        let mut guard = self.inner.write().unwrap();

        if guard.entries.contains_key(&normalized) {
            return Err(AutoForgeError::Duplicate {
                kind: "variable",
                name: normalized,
            });
        }

        if opts.is_path {
            let path = std::path::Path::new(value);
            if opts.create_path_if_not_exist {
                if let Err(e) = fs::create_dir_all(path) {
                    warn!("Failed to create path '{}': {}", value, e);
                }
            } else if opts.path_must_exist && !path.exists() {
                return Err(AutoForgeError::MissingPath {
                    name: normalized,
                    path: path.to_path_buf(),
                });
            }
        }

        let variable = Variable {
            name: normalized.clone(),
            base_name: name.to_string(),
            description: opts.description,
            value: value.to_string(),
            is_path: opts.is_path,
            path_must_exist: opts.path_must_exist,
            create_path_if_not_exist: opts.create_path_if_not_exist,
            folder_type: opts.folder_type,
            extras: opts.extras,
        };

        let pos = guard
            .sorted_names
            .binary_search(&normalized)
            .unwrap_or_else(|p| p);
        guard.sorted_names.insert(pos, normalized.clone());
        guard.entries.insert(normalized, variable.clone());

        debug!("Added variable '{}'", variable.name);
        Ok(variable)
    }

    /// Update an existing variable's raw value. Fails with [`AutoForgeError::Unknown`]
    /// if the variable has not been added.
    pub fn set(&self, name: &str, value: &str) -> Result<()> {
        let normalized = self.normalize_name(name);
        let mut guard = self.inner.write().unwrap();
        match guard.entries.get_mut(&normalized) {
            Some(var) => {
                var.value = value.to_string();
                Ok(())
            }
            None => Err(AutoForgeError::Unknown {
                kind: "variable",
                name: normalized,
            }),
        }
    }

    /// Remove a variable. Fails with [`AutoForgeError::Unknown`] if absent.
    pub fn remove(&self, name: &str) -> Result<()> {
        let normalized = self.normalize_name(name);
        let mut guard = self.inner.write().unwrap();
        if guard.entries.shift_remove(&normalized).is_none() {
            return Err(AutoForgeError::Unknown {
                kind: "variable",
                name: normalized,
            });
        }
        if let Ok(pos) = guard.sorted_names.binary_search(&normalized) {
            guard.sorted_names.remove(pos);
        }
        Ok(())
    }

    fn get_raw(&self, name: &str) -> Result<String> {
        let guard = self.inner.read().unwrap();
        guard
            .entries
            .get(name)
            .map(|v| v.value.clone())
            .ok_or_else(|| AutoForgeError::Unknown {
                kind: "variable",
                name: name.to_string(),
            })
    }

    /// Return the fully expanded value of a stored variable.
    #[instrument(skip(self), fields(name = %name))]
    pub fn get(&self, name: &str, quiet: bool) -> Result<String> {
        let normalized = self.normalize_name(name);
        let raw = match self.get_raw(&normalized) {
            Ok(v) => v,
            Err(e) => {
                if !quiet {
                    debug!("get('{}') failed: {}", normalized, e);
                }
                return Err(e);
            }
        };
        self.expand(&raw, true)
    }

    /// Expand `<$ref_NAME>` references to a fixed point, then (when `allow_env`)
    /// environment variables and a leading `~`.
    ///
    /// Fails with [`AutoForgeError::Unresolved`] if a reference names an unknown
    /// variable, if references form a cycle, or (when `allow_env`) an environment
    /// token remains unresolved.
    pub fn expand(&self, text: &str, allow_env: bool) -> Result<String> {
        let mut cache = HashMap::new();
        let mut visiting = HashSet::new();
        let mut out = self.expand_refs(text, &mut visiting, &mut cache)?;

        if allow_env {
            out = self.expand_env(&out)?;
            out = expand_home(&out);
        }

        Ok(out)
    }

    fn expand_refs(
        &self,
        text: &str,
        visiting: &mut HashSet<String>,
        cache: &mut HashMap<String, String>,
    ) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in REF_PATTERN.captures_iter(text) {
            let m = caps.get(0).unwrap();
            let name = caps[1].to_string();
            out.push_str(&text[last..m.start()]);
            out.push_str(&self.resolve_variable(&name, visiting, cache)?);
            last = m.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    fn resolve_variable(
        &self,
        name: &str,
        visiting: &mut HashSet<String>,
        cache: &mut HashMap<String, String>,
    ) -> Result<String> {
        let normalized = self.normalize_name(name);
        if let Some(cached) = cache.get(&normalized) {
            return Ok(cached.clone());
        }
        if visiting.contains(&normalized) {
            return Err(AutoForgeError::Unresolved {
                reference: normalized,
            });
        }

        let raw = self
            .get_raw(&normalized)
            .map_err(|_| AutoForgeError::Unresolved {
                reference: normalized.clone(),
            })?;

        visiting.insert(normalized.clone());
        let expanded = self.expand_refs(&raw, visiting, cache)?;
        visiting.remove(&normalized);

        cache.insert(normalized, expanded.clone());
        Ok(expanded)
    }

    fn expand_env(&self, text: &str) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in ENV_PATTERN.captures_iter(text) {
            let m = caps.get(0).unwrap();
            let var_name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .expect("one alternative always matches")
                .as_str();
            out.push_str(&text[last..m.start()]);
            match std::env::var(var_name) {
                Ok(value) => out.push_str(&value),
                Err(_) => {
                    return Err(AutoForgeError::Unresolved {
                        reference: var_name.to_string(),
                    })
                }
            }
            last = m.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    /// Snapshot of all variables in stable insertion-normalized order.
    pub fn export(&self) -> Vec<Variable> {
        let guard = self.inner.read().unwrap();
        guard.entries.values().cloned().collect()
    }
}

fn expand_home(text: &str) -> String {
    if let Some(rest) = text.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') {
            if let Ok(home) = std::env::var("HOME") {
                return format!("{home}{rest}");
            }
        }
    }
    text.to_string()
}
