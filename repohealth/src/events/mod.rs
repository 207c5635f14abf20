//! Pipeline lifecycle events and the sinks that receive them.
//!
//! The sink is passed explicitly to the pipeline runner and the job
//! registry; there is no process-wide sink.

mod event;
mod sink;

pub use event::PipelineEvent;
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
