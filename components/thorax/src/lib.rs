//! Thorax forwards newly created Bugout journal entries to Segment.
//!
//! A run pages through the journal from a cursor, transforms each entry into
//! analytics messages, enqueues them to the sink and checkpoints the cursor
//! back into the journal itself.

pub mod cli;
pub mod cursor;
pub mod helpers;
pub mod instrumentation;
pub mod journal;
pub mod metrics;
pub mod reporter;
pub mod runtime;
pub mod sink;
pub mod sync;
pub mod transformer;

#[cfg(test)]
mod test_utils;
