use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::catalog::Catalog;

/// How often the background sweeper refreshes every tracked class when no
/// interval is specified.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(120);

/// A background thread that periodically refreshes every class in a
/// catalog, so reclamations are observed and statistics stay current even
/// when no reporting layer is polling.
///
/// Dropping the sweeper stops the thread and waits for it to exit; a sweep
/// already in progress runs to completion first.
#[derive(Debug)]
pub struct Sweeper {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Starts a sweeper over `catalog` with [`DEFAULT_SWEEP_INTERVAL`].
    ///
    /// # Errors
    ///
    /// Returns an error if the operating system refuses to spawn the
    /// thread.
    pub fn start(catalog: Arc<Catalog>) -> io::Result<Self> {
        Self::with_interval(catalog, DEFAULT_SWEEP_INTERVAL)
    }

    /// Starts a sweeper that refreshes every `interval`.
    ///
    /// # Errors
    ///
    /// Returns an error if the operating system refuses to spawn the
    /// thread.
    pub fn with_interval(catalog: Arc<Catalog>, interval: Duration) -> io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("instance-tracker-sweep".to_string())
            .spawn(move || {
                tracing::debug!(interval_secs = interval.as_secs_f64(), "sweeper started");

                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => catalog.refresh_all(),
                        // Stop signal, or the sweeper handle was leaked
                        // without a proper drop.
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }

                tracing::debug!("sweeper stopped");
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for Sweeper {
    // Mutations here deadlock the test suite instead of failing it.
    #[cfg_attr(test, mutants::skip)]
    fn drop(&mut self) {
        // The thread may already have exited; a send failure is fine.
        drop(self.stop.send(()));

        if let Some(handle) = self.handle.take() {
            drop(handle.join());
        }
    }
}
