//! Event sink trait and implementations.

use super::PipelineEvent;
use async_trait::async_trait;
use tracing::{debug, info, warn, Level};

/// Receives pipeline lifecycle events.
///
/// Sinks must never fail the pipeline: errors are logged and suppressed.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: PipelineEvent);

    /// Emits an event without awaiting.
    fn try_emit(&self, event: PipelineEvent);
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: PipelineEvent) {}

    fn try_emit(&self, _event: PipelineEvent) {}
}

/// A sink that writes events to `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &PipelineEvent) {
        let event_type = event.event_type();
        let key = event.key().as_str();

        // Failures and corruption are always worth a warning.
        if matches!(
            event,
            PipelineEvent::JobFailed { .. } | PipelineEvent::CorruptArtifact { .. }
        ) {
            warn!(event_type, key, event_data = %event.to_data(), "Event: {}", event_type);
            return;
        }

        if self.level == Level::DEBUG {
            debug!(event_type, key, event_data = %event.to_data(), "Event: {}", event_type);
        } else {
            info!(event_type, key, event_data = %event.to_data(), "Event: {}", event_type);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: PipelineEvent) {
        self.log_event(&event);
    }

    fn try_emit(&self, event: PipelineEvent) {
        self.log_event(&event);
    }
}

/// A sink that records events, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events whose type starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: PipelineEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: PipelineEvent) {
        self.events.write().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RepoKey;

    fn started(stage: &str) -> PipelineEvent {
        PipelineEvent::StageStarted {
            key: RepoKey::parse("acme/widgets").unwrap(),
            stage: stage.to_string(),
            cached: false,
        }
    }

    #[tokio::test]
    async fn test_noop_and_logging_sinks_accept_events() {
        NoOpEventSink.emit(started("resolve-identity")).await;
        LoggingEventSink::default().emit(started("resolve-identity")).await;
        LoggingEventSink::debug().try_emit(started("resolve-identity"));
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(started("resolve-identity")).await;
        sink.try_emit(PipelineEvent::JobSucceeded {
            key: RepoKey::parse("acme/widgets").unwrap(),
            duration_ms: 1.0,
        });

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.events_of_type("stage.").len(), 1);
        assert_eq!(sink.events_of_type("job.").len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }
}
