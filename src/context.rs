//! Request context enrichment
//!
//! A [`ContextProvider`] tells the pipeline who was acting and where when a
//! failure happened. Hosts implement it on top of their session state; a
//! provider may know nothing at all.

use crate::error::ContextError;
use crate::events::ReportContext;

/// Source of the context attached to each captured failure
pub trait ContextProvider: Send + Sync {
    /// Describe the current user, module and host
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Unavailable` when the host cannot resolve its
    /// session state. The pipeline logs the error and records the failure
    /// without context.
    fn current_context(&self) -> Result<ReportContext, ContextError>;
}

/// Provider that never knows anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContext;

impl ContextProvider for NoContext {
    fn current_context(&self) -> Result<ReportContext, ContextError> {
        Ok(ReportContext::default())
    }
}

/// Provider that always returns the same context
///
/// Useful for processes without sessions, where only the host is known.
#[derive(Debug, Default, Clone)]
pub struct StaticContext {
    context: ReportContext,
}

impl StaticContext {
    pub fn new(context: ReportContext) -> Self {
        Self { context }
    }

    /// Context that only names the host
    pub fn host(hostname: impl Into<String>) -> Self {
        Self::new(ReportContext {
            hostname: Some(hostname.into()),
            ..ReportContext::default()
        })
    }
}

impl ContextProvider for StaticContext {
    fn current_context(&self) -> Result<ReportContext, ContextError> {
        Ok(self.context.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_context_is_empty() {
        let context = NoContext.current_context().unwrap();
        assert_eq!(context, ReportContext::default());
        assert_eq!(context.render(), None);
    }

    #[test]
    fn test_static_host_context() {
        let provider = StaticContext::host("app01.example.com");
        let context = provider.current_context().unwrap();

        assert_eq!(context.hostname.as_deref(), Some("app01.example.com"));
        assert_eq!(
            context.render().as_deref(),
            Some("hostname: app01.example.com")
        );
    }
}
