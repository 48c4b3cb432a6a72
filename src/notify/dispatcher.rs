use crate::events::{format_timestamp, FailureRecord, Timestamp};
use crate::notify::transport::{MailMessage, MailTransport};
use crate::sink::DiagnosticLog;
use chrono::Utc;
use log::{debug, info, Level};
use std::fmt::Write;
use std::sync::Arc;

/// Line written after every record in a notification body
pub const RECORD_DELIMITER: &str =
    "------------------------------------------------------------------------";

/// Result of dispatching one released batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The transport accepted the report
    Sent { records: usize },
    /// The transport failed; the report is dropped
    Failed { records: usize },
    /// Nothing to send
    Empty,
}

/// Turns a released batch into a single mail and hands it to the transport
///
/// The dispatcher never retries. When the transport fails, the failure is
/// written to the diagnostic log and the batch is dropped from the
/// notification channel; every record in it was already logged at ingestion.
pub struct NotificationDispatcher {
    transport: Arc<dyn MailTransport>,
    log: Arc<dyn DiagnosticLog>,
    recipient: String,
    application_name: String,
}

impl NotificationDispatcher {
    /// Create a dispatcher
    ///
    /// # Arguments
    ///
    /// * `transport` - Where rendered mails go
    /// * `log` - Diagnostic channel for delivery failures
    /// * `recipient` - Address every report is sent to
    /// * `application_name` - Name shown in the subject line
    pub fn new(
        transport: Arc<dyn MailTransport>,
        log: Arc<dyn DiagnosticLog>,
        recipient: impl Into<String>,
        application_name: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            log,
            recipient: recipient.into(),
            application_name: application_name.into(),
        }
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// Send one report for the whole batch
    ///
    /// An empty batch is skipped without touching the transport.
    pub fn dispatch(&self, batch: Vec<FailureRecord>) -> DispatchOutcome {
        if batch.is_empty() {
            debug!("Nothing to dispatch");
            return DispatchOutcome::Empty;
        }

        let records = batch.len();
        let message = self.compose(&batch, Utc::now());

        match self.transport.send_mail(&message) {
            Ok(()) => {
                info!(
                    "Sent error report with {} failure(s) to {} via {}",
                    records,
                    self.recipient,
                    self.transport.name()
                );
                DispatchOutcome::Sent { records }
            }
            Err(e) => {
                self.log.log(
                    Level::Error,
                    &format!(
                        "Failed to send error report with {} failure(s) via {}",
                        records,
                        self.transport.name()
                    ),
                    Some(&e),
                );
                DispatchOutcome::Failed { records }
            }
        }
    }

    /// Build the mail for a batch flushed at `flushed_at`
    pub fn compose(&self, batch: &[FailureRecord], flushed_at: Timestamp) -> MailMessage {
        let mut message = MailMessage::new(
            Self::format_subject(&self.application_name, &flushed_at),
            Self::format_body(batch),
        );
        message.add_recipient(self.recipient.clone());
        message
    }

    /// Subject line naming the application and the flush time
    pub fn format_subject(application_name: &str, flushed_at: &Timestamp) -> String {
        format!(
            "Exception in application \"{}\" at {}",
            application_name,
            format_timestamp(flushed_at)
        )
    }

    /// Render every record in order, each followed by [`RECORD_DELIMITER`]
    pub fn format_body(batch: &[FailureRecord]) -> String {
        let mut body = String::new();

        for (index, record) in batch.iter().enumerate() {
            // Writing to a String can't fail
            let _ = writeln!(body, "Error #{}", index + 1);
            if let Some(ref context) = record.context {
                let _ = writeln!(body, "User:\n{}", context);
            }
            if let Some(ref server) = record.server {
                let _ = writeln!(body, "Server: {}", server);
            }
            let _ = writeln!(body, "Time: {}", record.occurred_at_display());
            let _ = writeln!(body, "Message: {}", record.message);
            let _ = writeln!(body, "Stack trace:\n{}", record.stack_trace.trim_end());
            let _ = writeln!(body, "{}", RECORD_DELIMITER);
        }

        body
    }
}
