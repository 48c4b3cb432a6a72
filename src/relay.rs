//! Line protocol for feeding failures into a handler from another process
//!
//! Each line is one failure. Plain text becomes a failure with that message.
//! A line starting with `{` is read as JSON:
//!
//! ```text
//! {"message": "saving invoice", "causes": ["query failed", "null customer"], "kind": "validation"}
//! ```
//!
//! `causes` runs from outer to inner and `kind`, when present, types the
//! innermost cause so the classifier can recognise it.

use crate::error::ValidationRejection;
use log::warn;
use serde::Deserialize;
use std::io;

/// Type of the innermost cause on a JSON line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The peer dropped the connection
    ConnectionReset,
    /// User input failed validation
    Validation,
}

/// One failure as read from a JSON line
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FailureLine {
    pub message: String,
    #[serde(default)]
    pub causes: Vec<String>,
    #[serde(default)]
    pub kind: Option<FailureKind>,
}

impl FailureLine {
    /// Rebuild an error chain, outermost layer first
    pub fn into_failure(self) -> anyhow::Error {
        let mut layers = self.causes;
        layers.insert(0, self.message);

        // `layers` is never empty, it holds at least the message
        let innermost = layers.pop().unwrap_or_default();
        let mut failure = match self.kind {
            Some(FailureKind::ConnectionReset) => anyhow::Error::new(io::Error::new(
                io::ErrorKind::ConnectionReset,
                innermost,
            )),
            Some(FailureKind::Validation) => anyhow::Error::new(ValidationRejection(innermost)),
            None => anyhow::Error::msg(innermost),
        };

        for layer in layers.into_iter().rev() {
            failure = failure.context(layer);
        }
        failure
    }
}

/// Parse one input line
///
/// Returns `None` for blank lines. A line that looks like JSON but doesn't
/// parse is taken as plain text.
pub fn parse_failure_line(line: &str) -> Option<anyhow::Error> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line.starts_with('{') {
        match serde_json::from_str::<FailureLine>(line) {
            Ok(parsed) => return Some(parsed.into_failure()),
            Err(e) => warn!("Treating malformed JSON line as plain text: {}", e),
        }
    }

    Some(anyhow::Error::msg(line.to_string()))
}
