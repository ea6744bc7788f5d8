//! Background dispatch for async applications.

use std::{sync::Arc, time::Duration};

use clm_core::ClmError;
use tokio::{
    sync::oneshot::{self, error::TryRecvError},
    task::JoinHandle,
};

use crate::handle::ClmHandle;

/// Runs bounded blocking dispatch for one handle on a blocking worker.
///
/// Callbacks run on that worker thread. The loop ends on
/// [`shutdown`](Self::shutdown) or on the first failure other than a timeout.
pub struct DispatchPump {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), ClmError>>,
}

impl DispatchPump {
    /// Start pumping `handle`, waking at least every `poll_interval` to check
    /// for shutdown.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(handle: Arc<ClmHandle>, poll_interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::task::spawn_blocking(move || {
            tracing::debug!(handle = %handle.handle(), ?poll_interval, "Dispatch pump started");
            loop {
                match stop_rx.try_recv() {
                    Err(TryRecvError::Empty) => {}
                    Ok(()) | Err(TryRecvError::Closed) => break,
                }

                match handle.dispatch_blocking_timeout(poll_interval) {
                    Ok(()) | Err(ClmError::Timeout) => {}
                    Err(e) => {
                        tracing::warn!(
                            handle = %handle.handle(),
                            error = %e,
                            "Dispatch pump stopped"
                        );
                        return Err(e);
                    }
                }
            }
            tracing::debug!(handle = %handle.handle(), "Dispatch pump shut down");
            Ok(())
        });

        Self {
            stop_tx: Some(stop_tx),
            task,
        }
    }

    /// Whether the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// # Errors
    /// Returns the failure that stopped the loop early, if any.
    ///
    /// # Panics
    /// Resumes a panic raised by a callback on the worker.
    pub async fn shutdown(mut self) -> Result<(), ClmError> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }

        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(ClmError::Library),
        }
    }
}
