//! Background query worker for interactive front ends.
//!
//! Runs a single query on a dedicated thread with its own runtime so the
//! caller's event loop stays responsive. At most one job is in flight per
//! worker; the result arrives as a [`WorkerEvent`] on the worker's channel.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread::JoinHandle;

use thiserror::Error;

use crate::lm::ClosingAdapter;
use crate::runner::SingleQuery;
use crate::runner::run_single_query;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// `response` is the model output on success, the error message otherwise.
    Finished { response: String, success: bool },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("a query is already running")]
    Busy,
    #[error("failed to spawn query thread: {0}")]
    Spawn(String),
}

/// Handle to the background query thread. Dropping it waits for an
/// in-flight query to finish.
#[derive(Debug)]
pub struct QueryWorker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    events_tx: mpsc::Sender<WorkerEvent>,
    events_rx: mpsc::Receiver<WorkerEvent>,
}

impl Default for QueryWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryWorker {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            events_tx,
            events_rx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start `query` in the background. The adapter moves to the worker
    /// thread and is closed there once the query finishes.
    pub fn start(&mut self, adapter: ClosingAdapter, query: SingleQuery) -> Result<(), WorkerError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WorkerError::Busy);
        }
        // Reap the previous, already finished thread.
        self.join_finished();

        let running = Arc::clone(&self.running);
        let events = self.events_tx.clone();
        let spawned = std::thread::Builder::new()
            .name("llmde-query".to_string())
            .spawn(move || {
                let event = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => {
                        let outcome = runtime.block_on(run_single_query(adapter, &query));
                        WorkerEvent::Finished {
                            response: outcome.message(),
                            success: outcome.is_success(),
                        }
                    }
                    Err(err) => WorkerEvent::Finished {
                        response: format!("failed to start async runtime: {err}"),
                        success: false,
                    },
                };
                running.store(false, Ordering::SeqCst);
                if events.send(event).is_err() {
                    tracing::debug!("query worker dropped before result was delivered");
                }
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                Err(WorkerError::Spawn(err.to_string()))
            }
        }
    }

    /// Next event if one is ready.
    pub fn try_recv(&self) -> Option<WorkerEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Block until the running query finishes and return its event.
    pub fn wait(&mut self) -> Option<WorkerEvent> {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("query thread panicked");
            self.running.store(false, Ordering::SeqCst);
        }
        self.try_recv()
    }

    fn join_finished(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for QueryWorker {
    fn drop(&mut self) {
        self.join_finished();
    }
}
