//! Toolchain Resolver (C6): resolves declared tool paths, invokes `<tool> --version`,
//! and validates the result against a declared constraint expression.
//!
//! Grounded on `version_compare.py`'s `VersionCompare`: a tiered, most-specific-first
//! family of version-extraction regexes (`extract_version`) and a constraint parser
//! that treats a bare leading digit as an implicit `==` (`_parse_version_info`). Tuple
//! comparison there is hand-rolled; here it's `semver`-shaped but since most embedded
//! tool `--version` output isn't strict semver, constraints compare padded numeric
//! component vectors the same way the original's `_to_tuple` does, rather than
//! rejecting anything that doesn't parse as `major.minor.patch`.

use crate::errors::{AutoForgeError, Result};
use crate::solution::Toolchain;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, instrument};

/// Short timeout for `<tool> --version` probes (`spec.md` §4.6 "short timeout").
pub const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Version-extraction patterns, most specific first. Mirrors `version_compare.py`'s
/// `extract_version` ordering: three-part, two-part, then a bare number, optionally
/// preceded by the word "version" or a lone "v".
static VERSION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(\d+\.\d+\.\d+[\w.-]*)").unwrap(),
        Regex::new(r"(?:[Vv]ersion[:\s]?|v)(\d+\.\d+\.\d+[\w.-]*)").unwrap(),
        Regex::new(r"(\d+\.\d+\.\d+)").unwrap(),
        Regex::new(r"(?:[Vv]ersion[:\s]?|v)(\d+\.\d+[\w.-]*)").unwrap(),
        Regex::new(r"(\d+\.\d+)").unwrap(),
        Regex::new(r"(?:[Vv]ersion[:\s]?|v)(\d+[\w.-]*)").unwrap(),
    ]
});

/// `(operator, version)` pair parsed from a declared constraint such as `">=3.20"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    pub operator: Operator,
    pub version: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Ge,
    Gt,
    Eq,
    Lt,
    Le,
}

static CONSTRAINT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(>=|<=|==|>|<)?\s*(.+)$").expect("valid regex"));

/// Parse a constraint expression. A bare version with no leading operator defaults to
/// `==`, matching `version_compare.py`'s `_parse_version_info`.
pub fn parse_constraint(expr: &str) -> Result<VersionConstraint> {
    let expr = expr.trim();
    let caps = CONSTRAINT_PATTERN
        .captures(expr)
        .ok_or_else(|| AutoForgeError::VersionUnparseable {
            tool: String::new(),
            output: expr.to_string(),
        })?;
    let operator = match caps.get(1).map(|m| m.as_str()) {
        Some(">=") => Operator::Ge,
        Some(">") => Operator::Gt,
        Some("==") => Operator::Eq,
        Some("<") => Operator::Lt,
        Some("<=") => Operator::Le,
        _ => Operator::Eq,
    };
    let version_text = caps.get(2).unwrap().as_str();
    let version = extract_version(version_text).ok_or_else(|| AutoForgeError::VersionUnparseable {
        tool: String::new(),
        output: expr.to_string(),
    })?;
    Ok(VersionConstraint { operator, version })
}

/// Best-effort version extraction from arbitrary tool output. Returns numeric
/// components only (non-digit suffixes like `-release` are dropped), padded to the
/// length of the longest side when later compared.
pub fn extract_version(text: &str) -> Option<Vec<u64>> {
    for pattern in VERSION_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(text) {
            let raw = caps.get(1).map(|m| m.as_str()).unwrap_or_else(|| caps.get(0).unwrap().as_str());
            let parts: Vec<u64> = raw
                .split(['.', '-'])
                .filter_map(|p| p.chars().take_while(|c| c.is_ascii_digit()).collect::<String>().parse().ok())
                .collect();
            if !parts.is_empty() {
                return Some(parts);
            }
        }
    }
    None
}

fn compare_padded(a: &[u64], b: &[u64]) -> std::cmp::Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

/// Check whether `detected` satisfies `constraint`.
pub fn satisfies(detected: &[u64], constraint: &VersionConstraint) -> bool {
    use std::cmp::Ordering::*;
    let ord = compare_padded(detected, &constraint.version);
    match constraint.operator {
        Operator::Ge => ord == Greater || ord == Equal,
        Operator::Gt => ord == Greater,
        Operator::Eq => ord == Equal,
        Operator::Lt => ord == Less,
        Operator::Le => ord == Less || ord == Equal,
    }
}

fn format_version(v: &[u64]) -> String {
    v.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(".")
}

/// One resolved tool: its executable path and (if a constraint was declared) its
/// detected version string.
#[derive(Debug, Clone)]
pub struct ResolvedTool {
    pub path: PathBuf,
    pub version: Option<String>,
    pub options: Vec<String>,
}

/// Result of [`resolve`]: every required tool plus scalar toolchain metadata
/// (`architecture`, `build_system`, ...) accessible by key.
pub struct ResolvedToolchain {
    tools: IndexMap<String, ResolvedTool>,
    values: IndexMap<String, String>,
}

impl ResolvedToolchain {
    /// The resolved executable path for a required tool, if declared.
    pub fn get_tool(&self, name: &str) -> Option<&PathBuf> {
        self.tools.get(name).map(|t| &t.path)
    }

    pub fn get_tool_options(&self, name: &str) -> &[String] {
        self.tools.get(name).map(|t| t.options.as_slice()).unwrap_or(&[])
    }

    /// Scalar toolchain metadata, e.g. `architecture`.
    pub fn get_value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }
}

fn search_path(tool: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(tool);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Resolve every required tool in `toolchain`, verifying presence and (when declared)
/// version constraint satisfaction. Fails fast on the first unresolvable tool.
#[instrument(skip(toolchain), fields(toolchain = %toolchain.name))]
pub async fn resolve(toolchain: &Toolchain) -> Result<ResolvedToolchain> {
    let mut tools = IndexMap::new();

    for (name, req) in &toolchain.required_tools {
        let resolved_path = match &req.path {
            Some(p) if std::path::Path::new(p).is_absolute() => {
                let path = PathBuf::from(p);
                if !path.is_file() {
                    return Err(AutoForgeError::ToolMissing { tool: name.clone() });
                }
                path
            }
            Some(p) => search_path(p).ok_or_else(|| AutoForgeError::ToolMissing { tool: name.clone() })?,
            None => search_path(name).ok_or_else(|| AutoForgeError::ToolMissing { tool: name.clone() })?,
        };

        let version = match &req.version {
            Some(constraint_expr) => {
                let detected_raw = probe_version(&resolved_path).await?;
                let detected = extract_version(&detected_raw).ok_or_else(|| AutoForgeError::VersionUnparseable {
                    tool: name.clone(),
                    output: detected_raw.clone(),
                })?;
                let constraint = parse_constraint(constraint_expr).map_err(|_| AutoForgeError::VersionUnparseable {
                    tool: name.clone(),
                    output: constraint_expr.clone(),
                })?;
                if !satisfies(&detected, &constraint) {
                    return Err(AutoForgeError::VersionUnsatisfied {
                        tool: name.clone(),
                        found: format_version(&detected),
                        constraint: constraint_expr.clone(),
                    });
                }
                Some(format_version(&detected))
            }
            None => None,
        };

        debug!("Resolved tool '{}' at {:?} (version {:?})", name, resolved_path, version);
        tools.insert(
            name.clone(),
            ResolvedTool {
                path: resolved_path,
                version,
                options: req.options.clone(),
            },
        );
    }

    let mut values = IndexMap::new();
    values.insert("architecture".to_string(), toolchain.architecture.clone());
    values.insert("build_system".to_string(), toolchain.build_system.clone());
    values.insert("name".to_string(), toolchain.name.clone());

    Ok(ResolvedToolchain { tools, values })
}

async fn probe_version(tool_path: &std::path::Path) -> Result<String> {
    use crate::shell::{execute, CommandLine, ExecRequest, NoneSink};

    let sink = NoneSink;
    let mut req = ExecRequest::new(
        CommandLine::Tokens(vec![tool_path.to_string_lossy().to_string(), "--version".to_string()]),
        &sink,
    );
    req.timeout = Some(VERSION_PROBE_TIMEOUT);
    let result = execute(req).await?;
    if result.stdout_captured.is_empty() {
        Ok(result.stderr_captured)
    } else {
        Ok(result.stdout_captured)
    }
}
