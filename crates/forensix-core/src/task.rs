//! Background task handles with cooperative cancellation and progress.
//!
//! Long-running operations (carving, walking, batch hashing) take a
//! [`TaskContext`] and check it at their unit boundaries. [`spawn`] runs such
//! an operation on its own thread and hands back a [`TaskHandle`].

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::{ForensicsError, Result};

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One progress event: a percentage and a human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub percent: u8,
    pub message: String,
}

/// What a running operation sees of its task
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    cancel: CancellationToken,
    progress: Option<Sender<Progress>>,
}

impl TaskContext {
    pub fn new(cancel: CancellationToken, progress: Sender<Progress>) -> Self {
        Self {
            cancel,
            progress: Some(progress),
        }
    }

    /// A context nobody listens to and nobody cancels
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            progress: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Emit a progress event. A dropped receiver is not an error.
    pub fn report(&self, percent: u8, message: impl Into<String>) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(Progress {
                percent: percent.min(100),
                message: message.into(),
            });
        }
    }
}

/// Integer percentage of `done` over `total`, 100 when `total` is zero
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) as u128 * 100) / total as u128) as u8
}

/// Handle to an operation running on its own thread
pub struct TaskHandle<T> {
    cancel: CancellationToken,
    progress: Receiver<Progress>,
    join: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Progress stream; iteration ends once the task finishes
    pub fn progress(&self) -> &Receiver<Progress> {
        &self.progress
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Block until the task returns
    pub fn wait(self) -> Result<T> {
        self.join
            .join()
            .map_err(|_| ForensicsError::Task("worker thread panicked".to_string()))
    }
}

/// Run `job` on a named thread
pub fn spawn<T, F>(name: &str, job: F) -> Result<TaskHandle<T>>
where
    T: Send + 'static,
    F: FnOnce(TaskContext) -> T + Send + 'static,
{
    let cancel = CancellationToken::new();
    let (tx, rx) = crossbeam_channel::unbounded();
    let ctx = TaskContext::new(cancel.clone(), tx);

    let join = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || job(ctx))?;

    tracing::debug!("Spawned task '{}'", name);

    Ok(TaskHandle {
        cancel,
        progress: rx,
        join,
    })
}
