//! Core event types for the failure pipeline
//!
//! This module defines the records that flow from ingestion to notification:
//! the captured failure, the request context attached to it, and the verdict
//! the classifier hands back for every raw failure.

use crate::classifier::relevant_cause;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Format used wherever a timestamp is shown to an operator
pub const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// Render a timestamp in local time using [`TIMESTAMP_FORMAT`]
pub fn format_timestamp(timestamp: &Timestamp) -> String {
    timestamp
        .with_timezone(&Local)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// One reportable failure, captured at ingestion time
///
/// Records are immutable once created. They live in the pending batch until
/// the next flush and are consumed when the batch is rendered into a mail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureRecord {
    /// When the failure was ingested
    pub occurred_at: Timestamp,
    /// Message of the most specific cause in the failure chain
    pub message: String,
    /// Full cause chain, plus a backtrace when one was captured
    pub stack_trace: String,
    /// Description of the acting user and module, if known
    pub context: Option<String>,
    /// Host that observed the failure, if configured
    pub server: Option<String>,
}

impl FailureRecord {
    /// Capture a record from a raw failure
    ///
    /// The message comes from the innermost cause; the stack trace is the
    /// debug rendering of the whole chain.
    pub fn capture(
        failure: &anyhow::Error,
        context: Option<String>,
        server: Option<String>,
    ) -> Self {
        Self {
            occurred_at: Utc::now(),
            message: relevant_cause(failure).to_string(),
            stack_trace: format!("{:?}", failure),
            context,
            server,
        }
    }

    /// Occurrence time as shown in notifications
    pub fn occurred_at_display(&self) -> String {
        format_timestamp(&self.occurred_at)
    }
}

/// Who and what was active when a failure happened
///
/// Every field is optional; hosts fill in whatever they know.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportContext {
    pub acting_user: Option<String>,
    pub logged_in_user: Option<String>,
    pub acting_employee: Option<String>,
    pub module: Option<String>,
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
}

impl ReportContext {
    /// Render the known fields, one `label: value` line each
    ///
    /// Returns `None` when nothing is known so records don't carry an empty
    /// context string.
    pub fn render(&self) -> Option<String> {
        let fields = [
            ("acting user", &self.acting_user),
            ("logged in user", &self.logged_in_user),
            ("acting employee", &self.acting_employee),
            ("module", &self.module),
            ("hostname", &self.hostname),
            ("ip-address", &self.ip_address),
        ];

        let lines: Vec<String> = fields
            .iter()
            .filter_map(|(label, value)| value.as_ref().map(|v| format!("{}: {}", label, v)))
            .collect();

        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

/// Why a failure was dropped without being reported
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// The client closed its connection before a response could be sent
    ClientDisconnected,
    /// User input was rejected by form validation
    ValidationRejected,
}

/// Outcome of classifying a raw failure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Drop the failure; it is expected behavior
    Ignore(IgnoreReason),
    /// Log the failure and include it in the next notification
    Report,
}

impl Verdict {
    pub fn is_report(&self) -> bool {
        matches!(self, Verdict::Report)
    }
}
