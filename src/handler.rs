//! Error handler: the ingestion point of the pipeline
//!
//! An [`ErrorHandler`] classifies each raw failure, logs reportable ones
//! immediately, and buffers them for the next aggregated report. A
//! background [`FlushTimer`] releases the buffer once per window and hands it
//! to the [`NotificationDispatcher`].
//!
//! Code that has no handler at hand reports through [`report`], which falls
//! back to a short-lived handler built from an [`ErrorHandlerBuilder`].

use crate::aggregator::{FlushTimer, PendingBatch, TickReason};
use crate::classifier::FailureClassifier;
use crate::config::{Config, TransportConfig};
use crate::context::{ContextProvider, NoContext};
use crate::error::{ConfigError, PipelineError};
use crate::events::{FailureRecord, IgnoreReason, ReportContext, Verdict};
use crate::monitoring::{PipelineStats, StatsSnapshot};
use crate::notify::{
    DispatchOutcome, LogTransport, MailTransport, NotificationDispatcher, SendmailTransport,
};
use crate::sink::{DiagnosticLog, LogSink};
use log::{debug, info, Level};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Name of the flush timer thread
const FLUSH_THREAD_NAME: &str = "failmail-flush";

const DISCONNECT_MESSAGE: &str =
    "Connection closed before the response was sent; most likely the client went away";

/// Write the immediate diagnostic entry for a classified failure
fn log_classified(log: &dyn DiagnosticLog, verdict: Verdict, failure: &anyhow::Error) {
    match verdict {
        Verdict::Ignore(IgnoreReason::ClientDisconnected) => {
            log.log(Level::Info, DISCONNECT_MESSAGE, None)
        }
        Verdict::Ignore(IgnoreReason::ValidationRejected) => {
            log.log(Level::Debug, "Ignoring rejected user input", None)
        }
        Verdict::Report => log.log(Level::Error, "Unhandled failure", Some(&**failure)),
    }
}

/// A raw failure as surfaced by the host, with optional request context
#[derive(Debug)]
pub struct ErrorEvent {
    pub failure: anyhow::Error,
    /// Context known to the caller; when absent the handler asks its provider
    pub context: Option<ReportContext>,
}

impl ErrorEvent {
    pub fn new(failure: anyhow::Error) -> Self {
        Self {
            failure,
            context: None,
        }
    }

    pub fn with_context(mut self, context: ReportContext) -> Self {
        self.context = Some(context);
        self
    }
}

impl From<anyhow::Error> for ErrorEvent {
    fn from(failure: anyhow::Error) -> Self {
        Self::new(failure)
    }
}

/// Buffer and dispatcher shared by the handler and its flush thread
struct Notifier {
    batch: PendingBatch,
    dispatcher: NotificationDispatcher,
    stats: Arc<PipelineStats>,
    log: Arc<dyn DiagnosticLog>,
}

impl Notifier {
    /// Detach the current batch and send it; empty windows are skipped quietly
    fn flush(&self) -> DispatchOutcome {
        let batch = self.batch.drain();
        if batch.is_empty() {
            return DispatchOutcome::Empty;
        }

        let outcome = self.dispatcher.dispatch(batch);
        match outcome {
            DispatchOutcome::Sent { records } => self.stats.record_sent(records),
            DispatchOutcome::Failed { .. } => self.stats.record_dispatch_failure(),
            DispatchOutcome::Empty => {}
        }
        outcome
    }

    /// Flush from the timer thread; a panic is logged and the timer keeps going
    fn flush_on_tick(&self, reason: TickReason) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.flush())) {
            Ok(outcome) => debug!("Flush on {:?}: {:?}", reason, outcome),
            Err(payload) => {
                self.stats.record_pipeline_fault();
                self.log.log(
                    Level::Error,
                    &format!(
                        "Error report flush panicked, continuing with the next window: {}",
                        panic_message(payload.as_ref())
                    ),
                    None,
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Builds error handlers
///
/// The builder is cheap to clone. [`report`] keeps one around to create
/// transient handlers when no long-lived handler is active.
#[derive(Clone)]
pub struct ErrorHandlerBuilder {
    config: Config,
    window: Option<Duration>,
    classifier: Arc<FailureClassifier>,
    transport: Option<Arc<dyn MailTransport>>,
    log: Arc<dyn DiagnosticLog>,
    context: Arc<dyn ContextProvider>,
}

impl ErrorHandlerBuilder {
    /// Start from a configuration, with the built-in rules, the configured
    /// transport, the `log` sink and no context
    pub fn new(config: Config) -> Self {
        Self {
            config,
            window: None,
            classifier: Arc::new(FailureClassifier::new()),
            transport: None,
            log: Arc::new(LogSink),
            context: Arc::new(NoContext),
        }
    }

    /// Override the configured window length
    pub fn window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    pub fn classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Use this transport instead of the configured one
    pub fn transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn diagnostic_log(mut self, log: Arc<dyn DiagnosticLog>) -> Self {
        self.log = log;
        self
    }

    pub fn context_provider(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = context;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn configured_transport(&self) -> Arc<dyn MailTransport> {
        if let Some(ref transport) = self.transport {
            return Arc::clone(transport);
        }

        match &self.config.notification.transport {
            TransportConfig::Log => Arc::new(LogTransport),
            TransportConfig::Sendmail { path, from } => {
                let transport = SendmailTransport::new(path.clone());
                match from {
                    Some(from) => Arc::new(transport.with_from(from.clone())),
                    None => Arc::new(transport),
                }
            }
        }
    }

    /// Build a handler and, unless the deployment is in debug mode, start its flush timer
    ///
    /// The debug flag is read here, once; a running handler never re-checks it.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` for an invalid configuration or a
    /// zero window, or `PipelineError::TimerSpawn` if the flush thread can't
    /// be started.
    pub fn build(&self) -> Result<ErrorHandler, PipelineError> {
        self.config.validate()?;
        if self.window.is_some_and(|window| window.is_zero()) {
            return Err(ConfigError::ValidationError(
                "flush window must be greater than zero".to_string(),
            )
            .into());
        }

        let stats = Arc::new(PipelineStats::new());
        let mut handler = ErrorHandler {
            classifier: Arc::clone(&self.classifier),
            log: Arc::clone(&self.log),
            context: Arc::clone(&self.context),
            stats: Arc::clone(&stats),
            server_name: self.config.application.server_name.clone(),
            notifier: None,
            timer: Mutex::new(None),
        };

        if !self.config.notifications_enabled() {
            info!(
                "Debug deployment of \"{}\": error notifications disabled",
                self.config.application.name
            );
            return Ok(handler);
        }

        let transport = self.configured_transport();
        let window = self.window.unwrap_or_else(|| self.config.window());
        info!(
            "Error notifications for \"{}\" go to {} via {} every {}s",
            self.config.application.name,
            self.config.notification.recipient,
            transport.name(),
            window.as_secs_f64()
        );

        let notifier = Arc::new(Notifier {
            batch: PendingBatch::new(),
            dispatcher: NotificationDispatcher::new(
                transport,
                Arc::clone(&self.log),
                self.config.notification.recipient.clone(),
                self.config.application.name.clone(),
            ),
            stats,
            log: Arc::clone(&self.log),
        });

        let ticking = Arc::clone(&notifier);
        let timer = FlushTimer::start(FLUSH_THREAD_NAME, window, move |reason| {
            ticking.flush_on_tick(reason)
        })?;

        handler.notifier = Some(notifier);
        handler.timer = Mutex::new(Some(timer));
        Ok(handler)
    }
}

/// Ingestion point for runtime failures
///
/// `handle` may be called from any number of threads at once. Dropping the
/// handler stops its timer; the timer thread sends whatever is still
/// buffered and exits.
pub struct ErrorHandler {
    classifier: Arc<FailureClassifier>,
    log: Arc<dyn DiagnosticLog>,
    context: Arc<dyn ContextProvider>,
    stats: Arc<PipelineStats>,
    server_name: Option<String>,
    notifier: Option<Arc<Notifier>>,
    timer: Mutex<Option<FlushTimer>>,
}

impl ErrorHandler {
    pub fn builder(config: Config) -> ErrorHandlerBuilder {
        ErrorHandlerBuilder::new(config)
    }

    /// Ingest one failure
    ///
    /// Ignored failures leave at most an info line. Reportable failures are
    /// logged at error level before this returns and, when notifications are
    /// enabled, buffered for the next report. Never waits on the transport.
    pub fn handle(&self, event: impl Into<ErrorEvent>) -> Verdict {
        let event = event.into();
        let verdict = self.classifier.classify(&event.failure);
        log_classified(self.log.as_ref(), verdict, &event.failure);

        if !verdict.is_report() {
            self.stats.record_ignored();
            return verdict;
        }
        self.stats.record_reported();

        if let Some(ref notifier) = self.notifier {
            let context = event
                .context
                .or_else(|| self.resolve_context())
                .and_then(|context| context.render());
            let record = FailureRecord::capture(&event.failure, context, self.server_name.clone());

            // Held across the ingest so shutdown can't take the timer in between
            let timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
            if timer.is_some() {
                let pending = notifier.batch.ingest(record);
                debug!("Buffered failure, {} pending", pending);
            } else {
                debug!("Handler is shut down, failure logged but not buffered");
            }
        }

        verdict
    }

    fn resolve_context(&self) -> Option<ReportContext> {
        match self.context.current_context() {
            Ok(context) => Some(context),
            Err(e) => {
                self.log
                    .log(Level::Warn, "Failed to resolve report context", Some(&e));
                None
            }
        }
    }

    /// Whether this handler buffers and sends reports
    pub fn notifications_enabled(&self) -> bool {
        self.notifier.is_some()
    }

    /// Number of failures waiting for the next flush
    pub fn pending(&self) -> usize {
        self.notifier
            .as_ref()
            .map(|notifier| notifier.batch.len())
            .unwrap_or(0)
    }

    /// Flush immediately on the calling thread
    ///
    /// Unlike the timer, this waits for the transport.
    pub fn flush_now(&self) -> DispatchOutcome {
        match self.notifier {
            Some(ref notifier) => notifier.flush(),
            None => DispatchOutcome::Empty,
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop the flush timer, waiting for its final flush
    ///
    /// Later failures are still logged but no longer buffered.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::TimerTerminated` if the timer thread panicked.
    pub fn shutdown(&self) -> Result<(), PipelineError> {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match timer {
            Some(mut timer) => {
                timer.stop()?;
                info!("Error handler shut down");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Report a failure from code outside the host's error channel
///
/// Forwards to `active` when the caller has a live handler. Otherwise builds
/// a transient handler from `fallback`, ingests the failure and drops the
/// handler again; its timer thread sends the single-failure report and exits.
pub fn report(
    active: Option<&ErrorHandler>,
    fallback: &ErrorHandlerBuilder,
    failure: anyhow::Error,
) -> Verdict {
    if let Some(handler) = active {
        return handler.handle(failure);
    }

    match fallback.build() {
        Ok(handler) => {
            debug!("No active error handler, using a transient one");
            handler.handle(failure)
        }
        Err(e) => {
            // Still log the failure itself; only the report is lost
            let verdict = fallback.classifier.classify(&failure);
            let level = if verdict.is_report() {
                Level::Error
            } else {
                Level::Debug
            };
            fallback
                .log
                .log(level, "Failed to build transient error handler", Some(&e));
            log_classified(fallback.log.as_ref(), verdict, &failure);
            verdict
        }
    }
}
