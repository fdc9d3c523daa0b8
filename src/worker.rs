use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver},
        Arc,
    },
    thread,
};
use tracing::error;

/// Single-slot exclusion for long-running flows: one worker at a time,
/// no queue. Acquisition is an atomic compare-and-swap, so a "busy"
/// answer is race-free no matter which thread asks.
#[derive(Debug, Clone, Default)]
pub struct WorkerSlot {
    busy: Arc<AtomicBool>,
}

impl WorkerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the slot, or returns `None` when a worker is already
    /// active. The returned guard releases the slot when dropped, so
    /// the front end always returns to a ready state even when the
    /// worker fails.
    pub fn try_acquire(&self) -> Option<WorkerGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then(|| WorkerGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct WorkerGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Final word from a background worker. Mid-run feedback travels
/// through the progress sink instead; this channel carries exactly one
/// message per job.
#[derive(Debug)]
pub enum WorkerMessage<T> {
    Completed(T),
    Failed { error: String },
}

/// Runs `job` on its own thread, holding `guard` for the duration.
/// The caller keeps the receiver and gets exactly one message.
pub fn spawn<T, F>(guard: WorkerGuard, job: F) -> Receiver<WorkerMessage<T>>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let message = match job() {
            Ok(value) => WorkerMessage::Completed(value),
            Err(err) => {
                error!("worker failed: {err:#}");
                WorkerMessage::Failed {
                    error: format!("{err:#}"),
                }
            }
        };
        // Release the slot before the final message goes out, so a
        // caller reacting to completion can start the next job.
        drop(guard);
        let _ = tx.send(message);
    });
    rx
}
