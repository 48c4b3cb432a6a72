use crate::error::PipelineError;
use log::{debug, error, info};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Why the timer invoked its callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickReason {
    /// The window elapsed
    Interval,
    /// The timer is stopping; this is the last call
    Shutdown,
}

/// Background thread that calls back once per window
///
/// The thread sleeps on a shutdown channel with a timeout equal to the
/// window. A timeout is a tick; a message or a disconnected sender stops the
/// loop after one final [`TickReason::Shutdown`] call. Dropping the timer
/// disconnects the sender, so a discarded timer never outlives its last flush.
#[derive(Debug)]
pub struct FlushTimer {
    interval: Duration,
    shutdown_sender: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl FlushTimer {
    /// Spawn the timer thread
    ///
    /// # Arguments
    ///
    /// * `name` - Thread name, shown in panics and debuggers
    /// * `interval` - Window length between ticks
    /// * `on_tick` - Called on the timer thread for every tick
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::TimerSpawn` if the OS refuses to create the thread.
    pub fn start<F>(name: &str, interval: Duration, mut on_tick: F) -> Result<Self, PipelineError>
    where
        F: FnMut(TickReason) + Send + 'static,
    {
        let (shutdown_sender, shutdown_receiver) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!("Flush timer started with interval {:?}", interval);

                loop {
                    match shutdown_receiver.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => on_tick(TickReason::Interval),
                        Ok(()) => {
                            debug!("Flush timer received shutdown signal");
                            break;
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            debug!("Flush timer owner dropped");
                            break;
                        }
                    }
                }

                on_tick(TickReason::Shutdown);
                debug!("Flush timer stopped");
            })
            .map_err(PipelineError::TimerSpawn)?;

        info!("Flush timer running every {}s", interval.as_secs_f64());

        Ok(Self {
            interval,
            shutdown_sender: Some(shutdown_sender),
            thread_handle: Some(handle),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the timer thread is still alive
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop the timer and wait for its final tick to complete
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::TimerTerminated` if the timer thread panicked.
    pub fn stop(&mut self) -> Result<(), PipelineError> {
        if let Some(sender) = self.shutdown_sender.take() {
            // The thread may already be gone; that's fine
            let _ = sender.send(());
        }

        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| {
                error!("Flush timer thread panicked");
                PipelineError::TimerTerminated
            })?;
        }

        Ok(())
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        // Dropping the sender disconnects the channel; the thread runs its
        // final tick and exits on its own without blocking the dropper.
        self.shutdown_sender.take();
        self.thread_handle.take();
    }
}
