//! Diagnostic log channel
//!
//! Every pipeline event an operator may need later (the immediate record of a
//! reportable failure, the note about a dropped client connection, a failed
//! mail delivery) goes through [`DiagnosticLog`]. The default sink forwards to
//! the `log` facade; [`MemoryLog`] keeps entries in memory for inspection.

use log::Level;
use std::error::Error;
use std::sync::{Mutex, PoisonError};

/// Log target used by [`LogSink`]
pub const LOG_TARGET: &str = "failmail";

/// Destination for pipeline diagnostics
pub trait DiagnosticLog: Send + Sync {
    /// Write one entry, optionally with the error that caused it
    fn log(&self, level: Level, message: &str, cause: Option<&(dyn Error + 'static)>);
}

/// Render an error and its `source()` chain
///
/// Produces the error's own message followed by one `Caused by:` line per
/// nested cause.
pub fn render_cause_chain(error: &(dyn Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str("\nCaused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Diagnostic sink backed by the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticLog for LogSink {
    fn log(&self, level: Level, message: &str, cause: Option<&(dyn Error + 'static)>) {
        match cause {
            Some(cause) => log::log!(
                target: LOG_TARGET,
                level,
                "{}: {}",
                message,
                render_cause_chain(cause)
            ),
            None => log::log!(target: LOG_TARGET, level, "{}", message),
        }
    }
}

/// A captured diagnostic entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
    /// Rendered cause chain, if a cause was attached
    pub cause: Option<String>,
}

/// Diagnostic sink that keeps every entry in memory
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all entries recorded so far, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of entries recorded at exactly `level`
    pub fn count_at(&self, level: Level) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| entry.level == level)
            .count()
    }

    /// Number of entries more severe than `level`
    ///
    /// `log::Level` orders `Error` lowest, so "above info" means `< Info`.
    pub fn count_above(&self, level: Level) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| entry.level < level)
            .count()
    }
}

impl DiagnosticLog for MemoryLog {
    fn log(&self, level: Level, message: &str, cause: Option<&(dyn Error + 'static)>) {
        let entry = LogEntry {
            level,
            message: message.to_string(),
            cause: cause.map(render_cause_chain),
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, PipelineError, TransportError};
    use std::io;

    #[test]
    fn test_render_cause_chain() {
        let error = PipelineError::TimerSpawn(io::Error::new(io::ErrorKind::Other, "thread limit"));
        let rendered = render_cause_chain(&error);

        assert_eq!(rendered, "Failed to start flush timer\nCaused by: thread limit");
    }

    #[test]
    fn test_render_wrapped_errors_once() {
        let config = PipelineError::from(ConfigError::ValidationError(
            "notification.window_seconds must be greater than zero".to_string(),
        ));
        assert_eq!(
            render_cause_chain(&config),
            "Invalid configuration value: notification.window_seconds must be greater than zero"
        );

        let io_error = TransportError::IoError(io::Error::new(io::ErrorKind::Other, "pipe closed"));
        assert_eq!(render_cause_chain(&io_error), "pipe closed");
    }

    #[test]
    fn test_render_cause_chain_anyhow() {
        let failure = anyhow::anyhow!("disk full").context("writing export");
        let rendered = render_cause_chain(&*failure);

        assert_eq!(rendered, "writing export\nCaused by: disk full");
    }

    #[test]
    fn test_memory_log_counts() {
        let log = MemoryLog::new();
        log.log(Level::Info, "client went away", None);
        log.log(Level::Error, "first", None);
        log.log(
            Level::Error,
            "second",
            Some(&TransportError::SendFailed("smtp down".to_string())),
        );
        log.log(Level::Debug, "noise", None);

        assert_eq!(log.entries().len(), 4);
        assert_eq!(log.count_at(Level::Error), 2);
        assert_eq!(log.count_at(Level::Info), 1);
        assert_eq!(log.count_above(Level::Info), 2);
        assert_eq!(
            log.entries()[2].cause.as_deref(),
            Some("Failed to send mail: smtp down")
        );
    }

    #[test]
    fn test_log_sink_accepts_entries() {
        // No logger is installed in unit tests; this only checks the calls are well formed
        let sink = LogSink;
        sink.log(Level::Warn, "warning without cause", None);
        sink.log(
            Level::Error,
            "error with cause",
            Some(&TransportError::NoRecipients),
        );
    }
}
