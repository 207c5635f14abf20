//! Completion handles for dispatched work.
//!
//! A [`Completer`] and any number of [`JobHandle`] clones share one `watch`
//! channel. The outcome only ever moves from `Pending` to a terminal state,
//! exactly once, so every reader observes the same terminal value.

use crate::errors::{ErrorKind, ErrorReport, RepoHealthError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// The state of a dispatched unit of work.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Not finished yet.
    Pending,
    /// Finished with a value.
    Value(Arc<T>),
    /// Finished with an error.
    Error(ErrorReport),
}

impl<T> Clone for Outcome<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Pending => Self::Pending,
            Self::Value(value) => Self::Value(Arc::clone(value)),
            Self::Error(report) => Self::Error(report.clone()),
        }
    }
}

impl<T> Outcome<T> {
    /// Returns true if the work has not finished.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Returns true if the work finished, successfully or not.
    #[must_use]
    pub fn is_done(&self) -> bool {
        !self.is_pending()
    }

    /// Returns the value, if finished successfully.
    #[must_use]
    pub fn value(&self) -> Option<&Arc<T>> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the error, if finished unsuccessfully.
    #[must_use]
    pub fn error(&self) -> Option<&ErrorReport> {
        match self {
            Self::Error(report) => Some(report),
            _ => None,
        }
    }
}

/// Creates a linked completer and handle.
///
/// `label` names the work in `NotReady` errors.
#[must_use]
pub fn completion<T>(label: impl Into<String>) -> (Completer<T>, JobHandle<T>) {
    let (tx, rx) = watch::channel(Outcome::Pending);
    let label: Arc<str> = Arc::from(label.into());
    (
        Completer {
            tx: Some(tx),
            label: Arc::clone(&label),
        },
        JobHandle { rx, label },
    )
}

/// The writing side of a completion handle.
///
/// Dropping a completer that has not completed resolves the handle with a
/// `PipelineFailure`, so a handle can never stay pending forever.
pub struct Completer<T> {
    tx: Option<watch::Sender<Outcome<T>>>,
    label: Arc<str>,
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl<T> Completer<T> {
    /// Returns the label the work was created with.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Records a successful value.
    ///
    /// Returns false if the outcome was already terminal.
    pub fn succeed(self, value: T) -> bool {
        self.finish(Outcome::Value(Arc::new(value)))
    }

    /// Records a failure.
    ///
    /// Returns false if the outcome was already terminal.
    pub fn fail(self, report: ErrorReport) -> bool {
        self.finish(Outcome::Error(report))
    }

    /// Records either a value or a failure.
    pub fn complete(self, result: Result<T, ErrorReport>) -> bool {
        match result {
            Ok(value) => self.succeed(value),
            Err(report) => self.fail(report),
        }
    }

    fn finish(mut self, outcome: Outcome<T>) -> bool {
        self.tx
            .take()
            .is_some_and(|tx| transition(&tx, outcome))
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let report = ErrorReport::new(
                ErrorKind::PipelineFailure,
                format!("Pipeline failure: {} was abandoned before completion", self.label),
            );
            transition(&tx, Outcome::Error(report));
        }
    }
}

fn transition<T>(tx: &watch::Sender<Outcome<T>>, outcome: Outcome<T>) -> bool {
    let mut outcome = Some(outcome);
    tx.send_if_modified(|current| {
        if current.is_pending() {
            if let Some(next) = outcome.take() {
                *current = next;
                return true;
            }
        }
        false
    })
}

/// The reading side of a completion handle.
///
/// Cheap to clone; every clone observes the same outcome.
pub struct JobHandle<T> {
    rx: watch::Receiver<Outcome<T>>,
    label: Arc<str>,
}

impl<T> Clone for JobHandle<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            label: Arc::clone(&self.label),
        }
    }
}

impl<T> fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("label", &self.label)
            .field("done", &self.is_done())
            .finish()
    }
}

impl<T> JobHandle<T> {
    /// Returns true once the work has finished. Never blocks.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.rx.borrow().is_done()
    }

    /// Returns a snapshot of the outcome. Never blocks.
    #[must_use]
    pub fn outcome(&self) -> Outcome<T> {
        self.rx.borrow().clone()
    }

    /// Returns the value without blocking.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` while pending, or the recorded failure.
    pub fn result(&self) -> Result<Arc<T>, RepoHealthError> {
        match self.outcome() {
            Outcome::Pending => Err(RepoHealthError::NotReady {
                key: self.label.to_string(),
            }),
            Outcome::Value(value) => Ok(value),
            Outcome::Error(report) => Err(report.to_error()),
        }
    }

    /// Returns the recorded failure, if any. Never blocks.
    #[must_use]
    pub fn error(&self) -> Option<ErrorReport> {
        self.rx.borrow().error().cloned()
    }

    /// Waits until the work has finished.
    pub async fn wait(&self) -> Outcome<T> {
        let mut rx = self.rx.clone();
        // A closed channel still holds the last value sent.
        let _ = rx.wait_for(Outcome::is_done).await;
        let outcome = rx.borrow().clone();
        outcome
    }

    /// Waits up to `timeout`; returns `None` if still pending.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_until_completed() {
        let (completer, handle) = completion::<u32>("acme/widgets");

        assert!(!handle.is_done());
        assert!(matches!(handle.result(), Err(RepoHealthError::NotReady { .. })));

        assert!(completer.succeed(7));

        assert!(handle.is_done());
        assert_eq!(*handle.result().unwrap(), 7);
        assert!(handle.error().is_none());
    }

    #[test]
    fn test_failure_is_replayed_to_every_clone() {
        let (completer, handle) = completion::<u32>("acme/widgets");
        let other = handle.clone();

        completer.fail(ErrorReport::new(ErrorKind::NotFound, "gone").with_stage("resolve-identity"));

        let first = handle.error().unwrap();
        let second = other.error().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.stage.as_deref(), Some("resolve-identity"));
        assert!(handle.result().is_err());
    }

    #[test]
    fn test_dropped_completer_resolves_to_failure() {
        let (completer, handle) = completion::<u32>("acme/widgets");
        drop(completer);

        let report = handle.error().unwrap();
        assert_eq!(report.kind, ErrorKind::PipelineFailure);
        assert!(report.message.contains("abandoned"));
    }

    #[test]
    fn test_terminal_state_never_changes() {
        let (tx, rx) = watch::channel(Outcome::<u32>::Pending);

        assert!(transition(&tx, Outcome::Value(Arc::new(1))));
        assert!(!transition(&tx, Outcome::Error(ErrorReport::new(ErrorKind::PipelineFailure, "late"))));

        assert_eq!(**rx.borrow().value().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wait_and_wait_timeout() {
        let (completer, handle) = completion::<&'static str>("acme/widgets");

        assert!(handle.wait_timeout(Duration::from_millis(20)).await.is_none());

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait().await })
        };
        completer.succeed("done");

        let outcome = waiter.await.unwrap();
        assert_eq!(**outcome.value().unwrap(), "done");
        assert!(handle.wait_timeout(Duration::from_millis(20)).await.is_some());
    }
}
