//! # Rate-Limited Request Queue
//!
//! Serializes outbound calls per source and enforces minimum spacing between
//! them, independent of caller concurrency. Explicit throttle signals from a
//! source put that source into a cooldown before the next dequeue.

pub mod rate_limited;

pub use rate_limited::{QueueError, QueueMetrics, RateLimitSignal, RateLimitedQueue};
