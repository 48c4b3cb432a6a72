//! Built-in ignore rules
//!
//! These rules recognise failures that are part of normal operation: clients
//! hanging up mid-response and users typing invalid input.

use crate::classifier::IgnoreRule;
use crate::error::ValidationRejection;
use crate::events::IgnoreReason;
use std::io;

/// Rule that matches a client closing its connection before the response was sent
///
/// Looks for an I/O error of a disconnect kind anywhere in the cause chain,
/// since hosts usually wrap the socket error in request context.
pub struct ClientDisconnectRule;

impl ClientDisconnectRule {
    fn is_disconnect(kind: io::ErrorKind) -> bool {
        matches!(
            kind,
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::NotConnected
                | io::ErrorKind::UnexpectedEof
        )
    }
}

impl IgnoreRule for ClientDisconnectRule {
    fn matches(&self, failure: &anyhow::Error) -> bool {
        failure
            .chain()
            .filter_map(|cause| cause.downcast_ref::<io::Error>())
            .any(|io_error| Self::is_disconnect(io_error.kind()))
    }

    fn name(&self) -> &str {
        "ClientDisconnectRule"
    }

    fn reason(&self) -> IgnoreReason {
        IgnoreReason::ClientDisconnected
    }
}

/// Rule that matches input rejected by form validation
pub struct ValidationRejectionRule;

impl IgnoreRule for ValidationRejectionRule {
    fn matches(&self, failure: &anyhow::Error) -> bool {
        failure
            .chain()
            .any(|cause| cause.downcast_ref::<ValidationRejection>().is_some())
    }

    fn name(&self) -> &str {
        "ValidationRejectionRule"
    }

    fn reason(&self) -> IgnoreReason {
        IgnoreReason::ValidationRejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn io_failure(kind: io::ErrorKind) -> anyhow::Error {
        anyhow::Error::new(io::Error::new(kind, "socket error"))
    }

    #[test]
    fn test_client_disconnect_kinds() {
        let rule = ClientDisconnectRule;

        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::NotConnected,
            io::ErrorKind::UnexpectedEof,
        ] {
            assert!(rule.matches(&io_failure(kind)), "{:?} should match", kind);
        }
    }

    #[test]
    fn test_client_disconnect_ignores_other_io_errors() {
        let rule = ClientDisconnectRule;

        assert!(!rule.matches(&io_failure(io::ErrorKind::NotFound)));
        assert!(!rule.matches(&io_failure(io::ErrorKind::PermissionDenied)));
        assert!(!rule.matches(&anyhow!("connection reset")));
    }

    #[test]
    fn test_client_disconnect_deep_in_chain() {
        let rule = ClientDisconnectRule;
        let failure = io_failure(io::ErrorKind::ConnectionReset)
            .context("flushing response body")
            .context("handling GET /reports");

        assert!(rule.matches(&failure));
        assert_eq!(rule.reason(), IgnoreReason::ClientDisconnected);
        assert_eq!(rule.name(), "ClientDisconnectRule");
    }

    #[test]
    fn test_validation_rejection() {
        let rule = ValidationRejectionRule;
        let failure = anyhow::Error::new(ValidationRejection("age must be positive".to_string()))
            .context("submitting employee form");

        assert!(rule.matches(&failure));
        assert!(!rule.matches(&anyhow!("Invalid value: age must be positive")));
        assert_eq!(rule.reason(), IgnoreReason::ValidationRejected);
    }
}
