use clap::Parser;
use failmail::config::Config;
use failmail::error::{ConfigError, PipelineError};
use failmail::events::Verdict;
use failmail::handler::{ErrorHandler, ErrorHandlerBuilder};
use failmail::notify::LogTransport;
use failmail::relay::parse_failure_line;
use log::{debug, error, info, warn};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Command-line arguments for the failure relay
#[derive(Parser)]
#[command(
    name = "failmail",
    about = "Collects application failures and mails them out in periodic reports",
    long_about = "Reads failures from standard input, one per line, logs each reportable one \
                  immediately and sends one aggregated report per window to the configured \
                  recipient. Client disconnects and validation rejections are ignored."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Log reports instead of sending them
    #[arg(long, help = "Write reports to the log instead of the configured transport")]
    dry_run: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in FailureRelay::load_config
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Convert config path to string safely, handling non-UTF-8 paths
    fn config_path_str(&self) -> Result<Option<&str>, String> {
        match &self.config {
            Some(path) => match path.to_str() {
                Some(path_str) => Ok(Some(path_str)),
                None => Err(format!(
                    "Configuration file path contains invalid UTF-8 characters: {}",
                    path.display()
                )),
            },
            None => Ok(None),
        }
    }
}

/// Feeds failures from standard input into an error handler
///
/// The reader thread forwards every line to the handler and signals shutdown
/// at end of input. Ctrl-C signals shutdown as well; either way the handler
/// performs one final flush before the process exits.
pub struct FailureRelay {
    handler: Arc<ErrorHandler>,

    /// Shutdown signal, sent on end of input or interrupt
    shutdown_sender: Sender<()>,
    shutdown_receiver: Receiver<()>,

    /// Stdin reader; may still be blocked on input at shutdown
    reader_handle: Option<JoinHandle<()>>,
}

impl FailureRelay {
    /// Create a relay with a running handler
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` if the configuration is invalid or the flush
    /// timer can't be started.
    pub fn new(config: Config, dry_run: bool) -> Result<Self, PipelineError> {
        info!("Initializing failure relay for \"{}\"", config.application.name);

        let mut builder = ErrorHandlerBuilder::new(config);
        if dry_run {
            info!("Dry run: reports are written to the log");
            builder = builder.transport(Arc::new(LogTransport));
        }

        let (shutdown_sender, shutdown_receiver) = mpsc::channel();

        Ok(FailureRelay {
            handler: Arc::new(builder.build()?),
            shutdown_sender,
            shutdown_receiver,
            reader_handle: None,
        })
    }

    /// Load configuration from file or use defaults
    ///
    /// A missing or unreadable file falls back to defaults with a warning;
    /// a file that can't be parsed or validated is an error.
    pub fn load_config(config_path: Option<&str>) -> Result<Config, ConfigError> {
        match config_path {
            Some(path) => {
                info!("Loading configuration from: {}", path);
                match Config::from_file(std::path::Path::new(path)) {
                    Ok(config) => Ok(config),
                    Err(ConfigError::ReadError(e)) => {
                        warn!("Configuration file not readable ({}), using defaults", e);
                        Ok(Config::default())
                    }
                    Err(e) => Err(e),
                }
            }
            None => {
                info!("Using default configuration");
                Ok(Config::default())
            }
        }
    }

    /// Start reading standard input on a background thread
    pub fn start(&mut self) -> io::Result<()> {
        let handler = Arc::clone(&self.handler);
        let shutdown_sender = self.shutdown_sender.clone();

        let handle = std::thread::Builder::new()
            .name("failmail-stdin".to_string())
            .spawn(move || {
                info!("Reading failures from standard input");

                let stdin = io::stdin();
                for line in stdin.lock().lines() {
                    match line {
                        Ok(line) => {
                            forward_line(&handler, &line);
                        }
                        Err(e) => {
                            error!("Failed to read standard input: {}", e);
                            break;
                        }
                    }
                }

                info!("End of input");
                if let Err(e) = shutdown_sender.send(()) {
                    debug!("Shutdown already in progress: {}", e);
                }
            })?;

        self.reader_handle = Some(handle);
        Ok(())
    }

    /// Block until end of input or interrupt
    pub fn wait_for_shutdown(&self) -> Result<(), mpsc::RecvError> {
        info!("Waiting for shutdown signal...");
        self.shutdown_receiver.recv()?;
        info!("Shutdown signal received");
        Ok(())
    }

    /// Stop the handler, flushing whatever is still pending
    pub fn stop(&mut self) -> Result<(), PipelineError> {
        info!("Stopping failure relay");

        if let Some(handle) = self.reader_handle.take() {
            if handle.is_finished() {
                if let Err(e) = handle.join() {
                    error!("Reader thread failed to join: {:?}", e);
                }
            } else {
                // Blocked on stdin after an interrupt; the process exit ends it
                debug!("Leaving stdin reader detached");
            }
        }

        self.handler.shutdown()?;
        self.handler.stats().log_summary();
        Ok(())
    }
}

/// Hand one input line to the handler
fn forward_line(handler: &ErrorHandler, line: &str) -> Option<Verdict> {
    let failure = parse_failure_line(line)?;
    let verdict = handler.handle(failure);
    debug!("Input line classified as {:?}", verdict);
    Some(verdict)
}

fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting failmail");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config_path = match cli.config_path_str() {
        Ok(path) => path,
        Err(e) => {
            error!("Invalid configuration path: {}", e);
            std::process::exit(1);
        }
    };

    let mut config = match FailureRelay::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.apply_env_overrides() {
        error!("Invalid environment override: {}", e);
        std::process::exit(1);
    }

    let mut relay = match FailureRelay::new(config, cli.dry_run) {
        Ok(relay) => relay,
        Err(e) => {
            error!("Failed to initialize failure relay: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = relay.start() {
        error!("Failed to start failure relay: {}", e);
        std::process::exit(1);
    }

    // Ctrl-C shuts down the same way end of input does
    let shutdown_sender = relay.shutdown_sender.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    }) {
        warn!("Failed to install SIGINT handler, only end of input stops the relay: {}", e);
    }

    if let Err(e) = relay.wait_for_shutdown() {
        error!("Error during shutdown wait: {}", e);
    }

    if let Err(e) = relay.stop() {
        error!("Error during shutdown: {}", e);
        std::process::exit(1);
    }

    info!("failmail shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use failmail::events::IgnoreReason;
    use failmail::notify::MemoryTransport;
    use failmail::sink::MemoryLog;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::{NamedTempFile, TempDir};

    fn cli(config: Option<PathBuf>) -> Cli {
        Cli {
            config,
            verbose: false,
            dry_run: false,
        }
    }

    #[test]
    fn test_cli_validation_with_existing_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[application]\nname = \"Work\"").unwrap();

        assert!(cli(Some(file.path().to_path_buf())).validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_missing_file() {
        // Missing files fall back to defaults
        assert!(cli(Some(PathBuf::from("/nonexistent/failmail.toml")))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_cli_validation_with_directory() {
        let dir = TempDir::new().unwrap();
        assert!(cli(Some(dir.path().to_path_buf())).validate().is_err());
    }

    #[test]
    fn test_cli_validation_no_config() {
        assert!(cli(None).validate().is_ok());
    }

    #[test]
    fn test_config_path_str() {
        assert_eq!(
            cli(Some(PathBuf::from("failmail.toml")))
                .config_path_str()
                .unwrap(),
            Some("failmail.toml")
        );
        assert_eq!(cli(None).config_path_str().unwrap(), None);
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let config = FailureRelay::load_config(Some("/nonexistent/failmail.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_config_invalid_file_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[notification]\nwindow_seconds = 0").unwrap();

        let result = FailureRelay::load_config(file.path().to_str());
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_forward_line() {
        let transport = Arc::new(MemoryTransport::new());
        let mut config = Config::default();
        config.notification.recipient = "dev@example.com".to_string();
        let handler = ErrorHandlerBuilder::new(config)
            .transport(transport.clone())
            .diagnostic_log(Arc::new(MemoryLog::new()))
            .window(Duration::from_secs(3600))
            .build()
            .unwrap();

        assert_eq!(forward_line(&handler, ""), None);
        assert_eq!(
            forward_line(&handler, "payment gateway timed out"),
            Some(Verdict::Report)
        );
        assert_eq!(
            forward_line(
                &handler,
                r#"{"message": "writing response", "kind": "connection_reset"}"#
            ),
            Some(Verdict::Ignore(IgnoreReason::ClientDisconnected))
        );
        assert_eq!(handler.pending(), 1);

        handler.shutdown().unwrap();
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("Message: payment gateway timed out"));
    }

    #[test]
    fn test_relay_stop_in_debug_mode() {
        let mut config = Config::default();
        config.application.debug = true;

        let mut relay = FailureRelay::new(config, true).unwrap();
        assert!(!relay.handler.notifications_enabled());
        assert!(relay.stop().is_ok());
    }
}
