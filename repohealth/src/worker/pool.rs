//! Fixed-size pool of worker threads.
//!
//! Each worker is an OS thread with its own single-threaded tokio runtime.
//! Workers pull boxed tasks from one shared queue, so a slow pipeline only
//! ever occupies its own thread and the request path never runs pipeline
//! code.

use super::handle::{completion, Completer, JobHandle};
use crate::config::ConfigError;
use crate::errors::{ErrorKind, ErrorReport, RepoHealthError};
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

type Task = Box<dyn FnOnce() -> LocalBoxFuture<'static, ()> + Send>;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How [`WorkerPool::shutdown`] treats outstanding work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Finish queued and in-flight work, then join the threads.
    Drain,
    /// Fail queued work and return without waiting.
    ///
    /// In-flight pipelines keep running on their threads; nothing waits for
    /// them.
    Abandon,
}

impl fmt::Display for ShutdownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drain => write!(f, "drain"),
            Self::Abandon => write!(f, "abandon"),
        }
    }
}

/// Runs dispatched work on a fixed set of threads.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Task>>>,
    receiver: Arc<Mutex<Receiver<Task>>>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    abandoned: Arc<AtomicBool>,
    size: usize,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl WorkerPool {
    /// Starts `size` worker threads.
    ///
    /// # Errors
    ///
    /// Returns a config error for a zero size, or an IO error if a runtime
    /// or thread cannot be created.
    pub fn new(size: usize) -> Result<Self, RepoHealthError> {
        if size == 0 {
            return Err(ConfigError::Invalid {
                field: "workers",
                message: "must be at least 1".to_string(),
            }
            .into());
        }

        let (sender, receiver) = mpsc::channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));
        let abandoned = Arc::new(AtomicBool::new(false));
        let mut threads = Vec::with_capacity(size);

        for id in 0..size {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let receiver = Arc::clone(&receiver);
            let abandoned = Arc::clone(&abandoned);

            let handle = thread::Builder::new()
                .name(format!("repohealth-worker-{id}"))
                .spawn(move || worker_loop(id, &runtime, &receiver, &abandoned))?;
            threads.push(handle);
        }

        info!(workers = size, "Worker pool started");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            threads: Mutex::new(threads),
            abandoned,
            size,
        })
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns true once [`Self::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Queues `work` and returns a handle to its outcome. Never blocks.
    ///
    /// A panic inside `work` is caught and recorded as a `PipelineFailure`;
    /// the worker thread survives it.
    pub fn dispatch<T, F, Fut>(&self, label: impl Into<String>, work: F) -> JobHandle<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ErrorReport>> + 'static,
    {
        let (completer, handle) = completion(label);
        self.execute(completer, work);
        handle
    }

    /// Queues `work`, recording its outcome through an existing completer.
    pub fn execute<T, F, Fut>(&self, completer: Completer<T>, work: F)
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ErrorReport>> + 'static,
    {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            completer.fail(ErrorReport::new(
                ErrorKind::PipelineFailure,
                "Pipeline failure: worker pool is shut down",
            ));
            return;
        };

        let task: Task = Box::new(move || {
            async move {
                let label = completer.label().to_string();
                let result = AssertUnwindSafe(async move { work().await })
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(panic_report(&label, panic.as_ref())));
                completer.complete(result);
            }
            .boxed_local()
        });

        // A send only fails once every worker has exited; the dropped task
        // resolves its handle as abandoned.
        if sender.send(task).is_err() {
            warn!("No worker is accepting tasks");
        }
    }

    /// Stops the pool.
    ///
    /// Calling it again is a no-op. `Drain` blocks until every queued task
    /// has run.
    pub fn shutdown(&self, mode: ShutdownMode) {
        let Some(sender) = self.sender.lock().take() else {
            return;
        };

        match mode {
            ShutdownMode::Drain => {
                drop(sender);
                let threads = std::mem::take(&mut *self.threads.lock());
                for thread in threads {
                    if thread.join().is_err() {
                        warn!("Worker thread terminated abnormally");
                    }
                }
            }
            ShutdownMode::Abandon => {
                self.abandoned.store(true, Ordering::Release);
                drop(sender);
                // An idle worker may hold the queue; it discards the rest.
                if let Some(receiver) = self.receiver.try_lock() {
                    while let Ok(task) = receiver.try_recv() {
                        drop(task);
                    }
                }
                self.threads.lock().clear();
            }
        }

        info!(mode = %mode, "Worker pool shut down");
    }
}

fn worker_loop(
    id: usize,
    runtime: &tokio::runtime::Runtime,
    receiver: &Mutex<Receiver<Task>>,
    abandoned: &AtomicBool,
) {
    debug!(worker = id, "Worker started");
    loop {
        let next = receiver.lock().recv_timeout(POLL_INTERVAL);
        let task = match next {
            Ok(task) => task,
            Err(RecvTimeoutError::Timeout) => {
                if abandoned.load(Ordering::Acquire) {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if abandoned.load(Ordering::Acquire) {
            drop(task);
            continue;
        }
        runtime.block_on(task());
    }
    debug!(worker = id, "Worker stopped");
}

fn panic_report(label: &str, panic: &(dyn Any + Send)) -> ErrorReport {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());

    error!(label, panic = %detail, "Pipeline panicked");
    let mut report = ErrorReport::new(
        ErrorKind::PipelineFailure,
        format!("Pipeline failure: {label} panicked"),
    );
    report.causes.push(detail);
    report
}
