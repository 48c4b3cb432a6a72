//! Mail transports
//!
//! The dispatcher hands every rendered report to a [`MailTransport`]. How the
//! mail actually leaves the process is up to the transport: piped into the
//! local `sendmail`, written to the log, or kept in memory.

use crate::error::TransportError;
use log::{debug, info};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};

/// A fully rendered notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub subject: String,
    pub body: String,
    pub recipients: BTreeSet<String>,
}

impl MailMessage {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            recipients: BTreeSet::new(),
        }
    }

    /// Add a recipient; duplicates collapse
    pub fn add_recipient(&mut self, address: impl Into<String>) {
        self.recipients.insert(address.into());
    }
}

/// Outbound mail delivery
#[cfg_attr(test, mockall::automock)]
pub trait MailTransport: Send + Sync {
    /// Deliver one message
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` when the message could not be handed off.
    fn send_mail(&self, message: &MailMessage) -> Result<(), TransportError>;

    /// Short name used in log lines
    fn name(&self) -> &'static str;
}

/// Transport that pipes messages into a sendmail-compatible binary
///
/// Uses `sendmail -t -oi`, so recipients are read from the `To:` header and
/// a lone `.` in the body does not end the message.
#[derive(Debug, Clone)]
pub struct SendmailTransport {
    program: PathBuf,
    from: Option<String>,
}

impl Default for SendmailTransport {
    fn default() -> Self {
        Self::new("/usr/sbin/sendmail")
    }
}

impl SendmailTransport {
    /// Create a transport for the given sendmail binary
    ///
    /// # Example
    /// ```
    /// use failmail::notify::SendmailTransport;
    ///
    /// let transport = SendmailTransport::new("/usr/sbin/sendmail")
    ///     .with_from("errors@example.com");
    /// ```
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            from: None,
        }
    }

    /// Set the `From:` header
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Render the message as RFC 822 text
    ///
    /// Header values are flattened to a single line so a subject can't
    /// inject extra headers.
    pub fn render(&self, message: &MailMessage) -> String {
        let header = |value: &str| value.replace(['\r', '\n'], " ");
        let recipients: Vec<&str> = message.recipients.iter().map(String::as_str).collect();

        let mut rendered = String::new();
        if let Some(ref from) = self.from {
            rendered.push_str(&format!("From: {}\n", header(from)));
        }
        rendered.push_str(&format!("To: {}\n", header(&recipients.join(", "))));
        rendered.push_str(&format!("Subject: {}\n", header(&message.subject)));
        rendered.push_str("Content-Type: text/plain; charset=utf-8\n");
        rendered.push('\n');
        rendered.push_str(&message.body);
        if !message.body.ends_with('\n') {
            rendered.push('\n');
        }
        rendered
    }
}

impl MailTransport for SendmailTransport {
    fn send_mail(&self, message: &MailMessage) -> Result<(), TransportError> {
        if message.recipients.is_empty() {
            return Err(TransportError::NoRecipients);
        }

        let mut child = Command::new(&self.program)
            .arg("-t")
            .arg("-oi")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                TransportError::SendFailed(format!(
                    "Failed to execute {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        // stdin is closed at the end of this block so the child sees EOF
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(self.render(message).as_bytes()),
            None => Ok(()),
        };

        // Always reap the child; its exit status explains a broken pipe better
        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::SendFailed(format!(
                "{} failed with status {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }
        written?;

        debug!("Handed mail to {}", self.program.display());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sendmail"
    }
}

/// Transport that writes messages to the log instead of sending them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

impl MailTransport for LogTransport {
    fn send_mail(&self, message: &MailMessage) -> Result<(), TransportError> {
        let recipients: Vec<&str> = message.recipients.iter().map(String::as_str).collect();
        info!(
            "MAIL to {} - Subject: {}\n{}",
            recipients.join(", "),
            message.subject,
            message.body
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Transport that keeps messages in memory
///
/// Can be told to fail a number of upcoming sends to exercise the
/// dispatcher's failure path.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<MailMessage>>,
    attempts: Mutex<usize>,
    failures_remaining: Mutex<usize>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport whose next `count` sends fail
    pub fn failing(count: usize) -> Self {
        let transport = Self::new();
        transport.fail_next(count);
        transport
    }

    /// Make the next `count` sends fail
    pub fn fail_next(&self, count: usize) {
        *self
            .failures_remaining
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = count;
    }

    /// Messages delivered successfully, oldest first
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of send attempts, including failed ones
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MailTransport for MemoryTransport {
    fn send_mail(&self, message: &MailMessage) -> Result<(), TransportError> {
        *self.attempts.lock().unwrap_or_else(PoisonError::into_inner) += 1;

        {
            let mut failures = self
                .failures_remaining
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *failures > 0 {
                *failures -= 1;
                return Err(TransportError::SendFailed(
                    "Simulated transport failure".to_string(),
                ));
            }
        }

        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_message() -> MailMessage {
        let mut message = MailMessage::new("Exception in application \"Work\"", "Error #1\n");
        message.add_recipient("dev@example.com");
        message
    }

    #[test]
    fn test_recipients_deduplicate() {
        let mut message = create_test_message();
        message.add_recipient("dev@example.com");
        message.add_recipient("ops@example.com");

        assert_eq!(message.recipients.len(), 2);
    }

    #[test]
    fn test_sendmail_render() {
        let transport = SendmailTransport::new("/usr/sbin/sendmail").with_from("errors@example.com");
        let rendered = transport.render(&create_test_message());

        assert_eq!(
            rendered,
            "From: errors@example.com\n\
             To: dev@example.com\n\
             Subject: Exception in application \"Work\"\n\
             Content-Type: text/plain; charset=utf-8\n\
             \n\
             Error #1\n"
        );
    }

    #[test]
    fn test_sendmail_render_flattens_header_newlines() {
        let transport = SendmailTransport::default();
        let mut message = MailMessage::new("line one\r\nBcc: victim@example.com", "body");
        message.add_recipient("dev@example.com");

        let rendered = transport.render(&message);
        assert!(rendered.contains("Subject: line one  Bcc: victim@example.com\n"));
        assert!(!rendered.contains("\nBcc:"));
        assert!(rendered.ends_with("body\n"));
    }

    #[test]
    fn test_sendmail_requires_recipients() {
        let transport = SendmailTransport::default();
        let message = MailMessage::new("subject", "body");

        assert!(matches!(
            transport.send_mail(&message),
            Err(TransportError::NoRecipients)
        ));
    }

    #[test]
    fn test_sendmail_missing_binary() {
        let transport = SendmailTransport::new("/nonexistent/sendmail");
        let result = transport.send_mail(&create_test_message());

        assert!(matches!(result, Err(TransportError::SendFailed(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_sendmail_non_zero_exit() {
        // `false` ignores its arguments and exits with status 1
        let transport = SendmailTransport::new("false");
        let result = transport.send_mail(&create_test_message());

        match result {
            Err(TransportError::SendFailed(reason)) => assert!(reason.contains("failed with status")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_sendmail_early_exit_reports_status() {
        // The body overflows the pipe buffer, so the write fails once `false` exits
        let transport = SendmailTransport::new("false");
        let mut message = MailMessage::new("subject", "x".repeat(1 << 20));
        message.add_recipient("dev@example.com");

        for _ in 0..3 {
            match transport.send_mail(&message) {
                Err(TransportError::SendFailed(reason)) => {
                    assert!(reason.contains("failed with status"))
                }
                other => panic!("unexpected result: {:?}", other),
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_sendmail_success() {
        // `true` ignores its arguments and stdin and exits with status 0
        let transport = SendmailTransport::new("true");
        match transport.send_mail(&create_test_message()) {
            Ok(()) => {}
            // The child may exit before the body is written
            Err(TransportError::IoError(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe)
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn test_log_transport() {
        let transport = LogTransport;
        assert!(transport.send_mail(&create_test_message()).is_ok());
        assert_eq!(transport.name(), "log");
    }

    #[test]
    fn test_memory_transport_records() {
        let transport = MemoryTransport::new();
        transport.send_mail(&create_test_message()).unwrap();

        assert_eq!(transport.sent(), vec![create_test_message()]);
        assert_eq!(transport.attempts(), 1);
    }

    #[test]
    fn test_memory_transport_failures() {
        let transport = MemoryTransport::failing(2);
        let message = create_test_message();

        assert!(transport.send_mail(&message).is_err());
        assert!(transport.send_mail(&message).is_err());
        assert!(transport.send_mail(&message).is_ok());

        assert_eq!(transport.attempts(), 3);
        assert_eq!(transport.sent().len(), 1);
    }
}
