//! IO boundaries: position ingest, event egress, sink traits.

pub mod egress;
pub mod ingest;
pub mod sinks;

pub use egress::{write_segments, EventEgress};
pub use ingest::PositionIngest;
pub use sinks::{
    ChannelEventSink, CollectingEventSink, EventSink, JsonlMarkerStore, MarkerStore,
    MemoryMarkerStore,
};
