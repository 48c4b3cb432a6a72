/// Failure classifier and ignore rule implementations
pub mod failure_classifier;
pub mod rules;

pub use failure_classifier::{relevant_cause, FailureClassifier, IgnoreRule};
pub use rules::{ClientDisconnectRule, ValidationRejectionRule};
