//! Byte-progress reporting for frames in flight.
//!
//! The [`Framer`](crate::Framer) reports one [`ProgressEvent`] per chunk to
//! an optional [`ProgressObserver`]. Counts cover the whole frame, header
//! included. Observers are purely informational.

use tracing::debug;

use crate::message::MessageType;

/// Which way the bytes are moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

/// Progress of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub direction: Direction,
    pub message_type: MessageType,
    /// Bytes moved so far.
    pub transferred: u64,
    /// Total frame size in bytes.
    pub total: u64,
}

impl ProgressEvent {
    /// Returns true once every byte of the frame has moved.
    pub fn is_complete(&self) -> bool {
        self.transferred >= self.total
    }

    /// Completion as a percentage in `0.0..=100.0`.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.transferred as f64 / self.total as f64) * 100.0
    }
}

/// Receives progress events from a framer.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Observer that logs every event at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressObserver for TracingProgress {
    fn on_progress(&self, event: ProgressEvent) {
        debug!(
            direction = ?event.direction,
            message_type = %event.message_type,
            transferred = event.transferred,
            total = event.total,
            "{:.1}%",
            event.percent()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn event(transferred: u64, total: u64) -> ProgressEvent {
        ProgressEvent {
            direction: Direction::Sent,
            message_type: MessageType::UploadFile,
            transferred,
            total,
        }
    }

    #[test]
    fn test_percent() {
        assert_eq!(event(0, 200).percent(), 0.0);
        assert_eq!(event(50, 200).percent(), 25.0);
        assert_eq!(event(200, 200).percent(), 100.0);
        assert_eq!(event(0, 0).percent(), 100.0);
    }

    #[test]
    fn test_is_complete() {
        assert!(!event(10, 20).is_complete());
        assert!(event(20, 20).is_complete());
    }

    #[test]
    fn test_closure_observer() {
        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();
        let observer = move |e: ProgressEvent| {
            counter.store(e.transferred, Ordering::SeqCst);
        };

        observer.on_progress(event(42, 100));
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_tracing_observer_does_not_panic() {
        TracingProgress.on_progress(event(1, 2));
    }
}
