//! Config Preprocessor (C1): strips comments and trailing commas from JSON-with-comments
//! input and parses the result into a typed tree.
//!
//! Grounded on the original `CoreJSONCProcessor`: a combined string-or-comment regex
//! used to blank out comments without disturbing string contents, a multi-line string
//! normalization pass that runs before comment stripping, trailing-comma removal, and
//! `@formatter:` pragma stripping applied to the parsed tree. Parsing itself uses
//! `serde_json` (already part of the dependency stack) instead of hand-rolling a JSON
//! parser.

use crate::errors::{AutoForgeError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Matches a (possibly multi-line, already-normalized) string literal, a `//` line
/// comment, or a `/* ... */` block comment. Only the non-string alternatives are
/// blanked by [`strip_comments`].
static STRING_OR_COMMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:\\.|[^"\\])*"|//[^\n]*|/\*[\s\S]*?\*/"#).expect("valid regex")
});

/// Matches a double-quoted string literal that may span multiple physical lines.
static MULTILINE_STRING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(?:\\.|[^"\\])*""#).expect("valid regex"));

/// Matches a trailing comma immediately before a closing `]` or `}`.
static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(\s*[\]}])").expect("valid regex"));

/// Preprocess a JSONC file from disk. Tries `.json` and `.jsonc` extensions if the
/// requested path doesn't exist, per `spec.md` §6.
pub fn preprocess_file(path: &Path) -> Result<Value> {
    let resolved = resolve_extension(path)?;
    let text = std::fs::read_to_string(&resolved).map_err(|source| AutoForgeError::Io {
        path: resolved.clone(),
        source,
    })?;
    preprocess_text(&text)
}

fn resolve_extension(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    let alt_ext = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Some("jsonc"),
        Some("jsonc") => Some("json"),
        _ => None,
    };
    if let Some(ext) = alt_ext {
        let candidate = path.with_extension(ext);
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(AutoForgeError::FileNotFound {
        path: path.to_path_buf(),
    })
}

/// Preprocess JSONC text directly (used for in-memory solution fragments and tests).
pub fn preprocess_text(text: &str) -> Result<Value> {
    let normalized = normalize_multiline_strings(text);
    let stripped = strip_comments(&normalized);
    let cleaned = strip_trailing_commas(&stripped);

    let value: Value = serde_json::from_str(&cleaned).map_err(|e| {
        let line = e.line();
        AutoForgeError::ParseError {
            line,
            message: e.to_string(),
            context: context_window(&cleaned, line),
        }
    })?;

    Ok(strip_formatter_pragmas(value))
}

/// Replace literal newlines inside double-quoted string spans with `\n` escapes so the
/// surrounding JSON stays on single physical lines before parsing.
fn normalize_multiline_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in MULTILINE_STRING.find_iter(text) {
        out.push_str(&text[last..m.start()]);
        if m.as_str().contains('\n') {
            out.push_str(&m.as_str().replace('\n', "\\n"));
        } else {
            out.push_str(m.as_str());
        }
        last = m.end();
    }
    out.push_str(&text[last..]);
    out
}

/// Blank out `//` and `/* */` comments while leaving string contents (including
/// anything that looks like a comment marker inside a string) untouched.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in STRING_OR_COMMENT.find_iter(text) {
        out.push_str(&text[last..m.start()]);
        if m.as_str().starts_with('"') {
            out.push_str(m.as_str());
        }
        // else: comment — contributes nothing.
        last = m.end();
    }
    out.push_str(&text[last..]);
    out
}

fn strip_trailing_commas(text: &str) -> String {
    TRAILING_COMMA.replace_all(text, "$1").into_owned()
}

/// Recursively drop object entries whose value is a PyCharm `@formatter:on`/`off`
/// pragma string — a leftover from hand-edited solution files that shouldn't surface
/// as real configuration values.
fn strip_formatter_pragmas(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let cleaned = map
                .into_iter()
                .filter(|(_, v)| !is_formatter_pragma(v))
                .map(|(k, v)| (k, strip_formatter_pragmas(v)))
                .collect();
            Value::Object(cleaned)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(strip_formatter_pragmas).collect())
        }
        other => other,
    }
}

fn is_formatter_pragma(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.trim_start().starts_with("@formatter:"))
}

fn context_window(text: &str, error_line: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = error_line.saturating_sub(6);
    let end = (error_line + 4).min(lines.len());
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate().take(end).skip(start) {
        let lineno = i + 1;
        let marker = if lineno == error_line { ">" } else { " " };
        out.push_str(&format!("{marker} {lineno:>4} | {line}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_and_block_comments() {
        let input = r#"{
            // leading comment
            "a": 1, /* inline */
            "b": "value // not a comment"
        }"#;
        let value = preprocess_text(input).unwrap();
        assert_eq!(value["a"], 1);
        assert_eq!(value["b"], "value // not a comment");
    }

    #[test]
    fn strips_trailing_commas() {
        let input = r#"{ "a": [1, 2, 3,], "b": 2, }"#;
        let value = preprocess_text(input).unwrap();
        assert_eq!(value["a"][2], 3);
        assert_eq!(value["b"], 2);
    }

    #[test]
    fn normalizes_multiline_strings() {
        let input = "{\n  \"a\": \"line one\nline two\"\n}";
        let value = preprocess_text(input).unwrap();
        assert_eq!(value["a"], "line one\nline two");
    }

    #[test]
    fn strips_formatter_pragmas() {
        let input = r#"{ "a": 1, "b": "@formatter:off" }"#;
        let value = preprocess_text(input).unwrap();
        assert!(value.get("b").is_none());
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn parse_error_reports_line_and_context() {
        let input = "{\n  \"a\": 1,\n  invalid\n}";
        let err = preprocess_text(input).unwrap_err();
        match err {
            AutoForgeError::ParseError { line, context, .. } => {
                assert!(line >= 1);
                assert!(context.contains('|'));
            }
            other => panic!("expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn idempotent_preprocessing() {
        let input = r#"{ "a": 1, /* c */ "b": [1,2,], }"#;
        let once = preprocess_text(input).unwrap();
        let twice = preprocess_text(&serde_json::to_string(&once).unwrap()).unwrap();
        assert_eq!(once, twice);
    }
}
