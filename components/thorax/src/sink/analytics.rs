// Local crates
use crate::sink::models::{Identify, SinkError, Track};

// External crates
use std::future::Future;

/// Delivery counters reported when a sink is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub failed: u64,
    pub batches: u64,
}

/// Buffered analytics collector.
///
/// `track` and `identify` only enqueue: an error means the message was
/// rejected up front, success means it was accepted for background delivery.
/// `close` must be called on every exit path; it drains and flushes whatever
/// is still buffered.
pub trait AnalyticsSink {
    fn track(&self, track: Track) -> impl Future<Output = Result<(), SinkError>> + Send;

    fn identify(&self, identify: Identify) -> impl Future<Output = Result<(), SinkError>> + Send;

    fn close(&mut self) -> impl Future<Output = DeliveryStats> + Send;
}
