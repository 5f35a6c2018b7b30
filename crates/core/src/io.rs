//! Output handling with stdout/stderr separation contract.
//!
//! Mirrors the teacher's `Output` helper: JSON mode writes only JSON to stdout, text
//! mode writes only user-facing results to stdout, and every log/diagnostic goes to
//! stderr via `tracing` instead of `println!`. Unlike the teacher's version this
//! carries no secret-redaction layer — `spec.md` §1 treats an encrypted-secrets helper
//! as an external collaborator, not something this engine implements.

use crate::errors::{AutoForgeError, Result};
use serde::Serialize;
use std::io::{self, Write};

/// Centralized stdout writer for CLI commands.
///
/// # Examples
///
/// ```
/// use autoforge_core::io::Output;
/// use serde_json::json;
///
/// let mut output = Output::new();
/// output.write_json(&json!({"status": "success", "count": 42})).unwrap();
/// output.write_line("Build completed successfully!").unwrap();
/// ```
pub struct Output {
    writer: Box<dyn Write + Send>,
}

impl Output {
    /// Create an `Output` writing to stdout.
    pub fn new() -> Self {
        Self {
            writer: Box::new(io::stdout()),
        }
    }

    /// Wrap an arbitrary writer. Used by tests to capture output in-memory.
    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        Self { writer }
    }

    /// Serialize `value` as pretty JSON followed by a newline.
    pub fn write_json<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let text = serde_json::to_string_pretty(value).map_err(|e| AutoForgeError::ParseError {
            line: 0,
            message: e.to_string(),
            context: String::new(),
        })?;
        self.write_line(&text)
    }

    /// Write a single line, plus trailing newline.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "{line}").map_err(|source| AutoForgeError::Io {
            path: std::path::PathBuf::new(),
            source,
        })
    }

    /// Write several lines in order.
    pub fn write_lines<I, S>(&mut self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.write_line(line.as_ref())?;
        }
        Ok(())
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|source| AutoForgeError::Io {
            path: std::path::PathBuf::new(),
            source,
        })
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);
    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn output_with_handle() -> (Output, SharedBuf) {
        let handle = SharedBuf(Arc::new(Mutex::new(Vec::new())));
        (Output::with_writer(Box::new(handle.clone())), handle)
    }

    fn contents(handle: &SharedBuf) -> String {
        String::from_utf8(handle.0.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn write_line_appends_newline() {
        let (mut output, handle) = output_with_handle();
        output.write_line("hello").unwrap();
        assert_eq!(contents(&handle), "hello\n");
    }

    #[test]
    fn write_json_emits_pretty_json() {
        let (mut output, handle) = output_with_handle();
        output.write_json(&serde_json::json!({"ok": true})).unwrap();
        assert!(contents(&handle).contains("\"ok\": true"));
    }

    #[test]
    fn write_lines_preserves_order() {
        let (mut output, handle) = output_with_handle();
        output.write_lines(["one", "two", "three"]).unwrap();
        assert_eq!(contents(&handle), "one\ntwo\nthree\n");
    }
}
