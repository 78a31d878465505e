// Hand-off between the capture worker and the presentation context
//
// The presentation context owns the subscriber and the overlay surface.
// Work produced elsewhere reaches it only as a queued task.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, error};

use crate::error::CaptureError;

/// Unit of work executed on the presentation context
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A serial execution context that accepts tasks from any thread
///
/// A task that cannot be queued is dropped before `post` returns, so any
/// guard it captured is released on the caller's thread.
pub trait Presenter: Send + Sync + 'static {
    /// Queues a task; tasks run in submission order
    fn post(&self, task: Task) -> Result<(), CaptureError>;

    /// Whether the calling thread is the presentation context itself
    fn is_current(&self) -> bool {
        false
    }
}

/// Runs `task` inline when already on the presentation context, otherwise queues it
pub fn run_on(presenter: &dyn Presenter, task: Task) -> Result<(), CaptureError> {
    if presenter.is_current() {
        task();
        Ok(())
    } else {
        presenter.post(task)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-backed serial queue acting as a presentation context
///
/// A panicking task is logged and does not take the queue down.
pub struct DispatchQueue {
    name: String,
    sender: Mutex<Option<UnboundedSender<Task>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl DispatchQueue {
    /// Spawns the queue's thread
    pub fn spawn(name: impl Into<String>) -> Result<Self, CaptureError> {
        let name = name.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();
        let queue_name = name.clone();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!(queue = %queue_name, "dispatch queue started");
                while let Some(task) = receiver.blocking_recv() {
                    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!(queue = %queue_name, "task panicked on presentation context");
                    }
                }
                debug!(queue = %queue_name, "dispatch queue drained");
            })
            .map_err(|e| CaptureError::SetupFailed(format!("failed to spawn {}: {}", name, e)))?;

        let thread_id = handle.thread().id();

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops accepting tasks, lets queued ones finish and joins the thread
    ///
    /// Called from the queue's own thread it only closes the queue.
    pub fn shutdown(&self) {
        lock(&self.sender).take();

        if self.is_current() {
            return;
        }

        if let Some(handle) = lock(&self.thread).take() {
            if handle.join().is_err() {
                error!(queue = %self.name, "dispatch thread terminated abnormally");
            }
        }
    }
}

impl Presenter for DispatchQueue {
    fn post(&self, task: Task) -> Result<(), CaptureError> {
        match lock(&self.sender).as_ref() {
            Some(sender) => sender.send(task).map_err(|_| CaptureError::DispatchClosed),
            None => Err(CaptureError::DispatchClosed),
        }
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
