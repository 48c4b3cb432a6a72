/// Error types for the failure pipeline
pub mod error;

/// Failure records, report context and classification verdicts
pub mod events;

/// Rules deciding which failures are reported
pub mod classifier;

/// Diagnostic log channel
pub mod sink;

/// Request context providers
pub mod context;

/// Pending batch and the periodic flush timer
pub mod aggregator;

/// Report composition and mail transports
pub mod notify;

/// Configuration management
pub mod config;

/// Pipeline self-monitoring
pub mod monitoring;

/// Error handler and the reporting entry point
pub mod handler;

/// Line protocol of the relay binary
pub mod relay;

// Re-export commonly used types
pub use error::{ConfigError, ContextError, PipelineError, TransportError, ValidationRejection};
pub use events::{FailureRecord, IgnoreReason, ReportContext, Verdict};
pub use handler::{report, ErrorEvent, ErrorHandler, ErrorHandlerBuilder};
