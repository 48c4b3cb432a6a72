use crate::classifier::rules::{ClientDisconnectRule, ValidationRejectionRule};
use crate::events::{IgnoreReason, Verdict};
use std::error::Error;

/// Decides whether a raw failure is worth reporting
///
/// The classifier holds an ordered list of ignore rules. The first rule that
/// matches wins; a failure no rule matches is reported.
pub struct FailureClassifier {
    rules: Vec<Box<dyn IgnoreRule>>,
}

/// Trait for rules that recognise expected, non-reportable failures
pub trait IgnoreRule: Send + Sync {
    /// Whether this rule recognises the failure
    fn matches(&self, failure: &anyhow::Error) -> bool;

    /// Get a human-readable name for this rule
    fn name(&self) -> &str;

    /// Reason recorded when this rule matches
    fn reason(&self) -> IgnoreReason;
}

impl Default for FailureClassifier {
    fn default() -> Self {
        let mut classifier = Self::empty();
        classifier.add_rule(Box::new(ClientDisconnectRule));
        classifier.add_rule(Box::new(ValidationRejectionRule));
        classifier
    }
}

impl FailureClassifier {
    /// Create a classifier with the built-in rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a classifier without rules; every failure is reported
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add an ignore rule, evaluated after the existing ones
    pub fn add_rule(&mut self, rule: Box<dyn IgnoreRule>) {
        self.rules.push(rule);
    }

    /// Get the number of configured rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Classify a raw failure
    pub fn classify(&self, failure: &anyhow::Error) -> Verdict {
        self.rules
            .iter()
            .find(|rule| rule.matches(failure))
            .map(|rule| Verdict::Ignore(rule.reason()))
            .unwrap_or(Verdict::Report)
    }
}

/// The most specific cause in a failure's chain
///
/// Hosts wrap failures in several layers of context before they reach the
/// handler; the innermost cause is the one an operator needs to see.
pub fn relevant_cause(failure: &anyhow::Error) -> &(dyn Error + 'static) {
    failure.root_cause()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationRejection;
    use anyhow::anyhow;
    use std::io;

    struct TimeoutRule;

    impl IgnoreRule for TimeoutRule {
        fn matches(&self, failure: &anyhow::Error) -> bool {
            failure.to_string().contains("timed out")
        }

        fn name(&self) -> &str {
            "TimeoutRule"
        }

        fn reason(&self) -> IgnoreReason {
            IgnoreReason::ClientDisconnected
        }
    }

    #[test]
    fn test_default_rules() {
        let classifier = FailureClassifier::new();
        assert_eq!(classifier.rule_count(), 2);
    }

    #[test]
    fn test_plain_failure_is_reported() {
        let classifier = FailureClassifier::new();
        let failure = anyhow!("division by zero").context("computing totals");

        assert_eq!(classifier.classify(&failure), Verdict::Report);
    }

    #[test]
    fn test_connection_reset_is_ignored() {
        let classifier = FailureClassifier::new();
        let failure = anyhow::Error::new(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ))
        .context("writing response");

        assert_eq!(
            classifier.classify(&failure),
            Verdict::Ignore(IgnoreReason::ClientDisconnected)
        );
    }

    #[test]
    fn test_validation_rejection_is_ignored() {
        let classifier = FailureClassifier::new();
        let failure = anyhow::Error::new(ValidationRejection("must not be empty".to_string()))
            .context("saving customer form");

        assert_eq!(
            classifier.classify(&failure),
            Verdict::Ignore(IgnoreReason::ValidationRejected)
        );
    }

    #[test]
    fn test_empty_classifier_reports_everything() {
        let classifier = FailureClassifier::empty();
        let failure = anyhow::Error::new(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));

        assert_eq!(classifier.classify(&failure), Verdict::Report);
    }

    #[test]
    fn test_custom_rule() {
        let mut classifier = FailureClassifier::empty();
        classifier.add_rule(Box::new(TimeoutRule));

        assert_eq!(
            classifier.classify(&anyhow!("request timed out")),
            Verdict::Ignore(IgnoreReason::ClientDisconnected)
        );
        assert_eq!(classifier.classify(&anyhow!("disk full")), Verdict::Report);
    }

    #[test]
    fn test_relevant_cause_unwraps_chain() {
        let failure = anyhow::Error::new(io::Error::new(io::ErrorKind::NotFound, "no such file"))
            .context("reading template")
            .context("rendering invoice");

        assert_eq!(relevant_cause(&failure).to_string(), "no such file");
    }

    #[test]
    fn test_relevant_cause_of_unwrapped_failure() {
        let failure = anyhow!("plain failure");
        assert_eq!(relevant_cause(&failure).to_string(), "plain failure");
    }
}
