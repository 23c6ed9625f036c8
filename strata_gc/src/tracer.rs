//! Per-collection event log.
//!
//! Keeps the most recent collections in a bounded ring so tests and
//! embedders can inspect what the collector did without a subscriber.

use crate::collector::{GcKind, GcReason};
use crate::stats::format_bytes;
use std::collections::VecDeque;
use std::time::Duration;

/// Events kept by default.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Summary of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcEvent {
    /// Sequence number, starting at 1.
    pub sequence: u64,
    /// Which collector ran.
    pub kind: GcKind,
    /// What triggered it.
    pub reason: GcReason,
    /// Pause length.
    pub duration: Duration,
    /// Heap bytes in use before the pause.
    pub bytes_before: usize,
    /// Heap bytes in use after the pause.
    pub bytes_after: usize,
    /// Bytes promoted to the old generation.
    pub promoted: usize,
    /// Bytes copied within the young generation.
    pub survived: usize,
    /// Evacuation candidates emptied by compaction.
    pub pages_evacuated: usize,
    /// Pages returned to the operating system.
    pub pages_released: usize,
}

impl GcEvent {
    /// Bytes reclaimed by the collection.
    #[inline]
    pub fn freed_bytes(&self) -> usize {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Bounded log of recent collections.
#[derive(Debug)]
pub struct GcTracer {
    events: VecDeque<GcEvent>,
    capacity: usize,
    sequence: u64,
    verbose: bool,
}

impl GcTracer {
    /// Create a tracer keeping at most `capacity` events.
    ///
    /// With `verbose`, every event is also logged at info level.
    pub fn new(capacity: usize, verbose: bool) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            sequence: 0,
            verbose,
        }
    }

    /// Next sequence number to be assigned.
    #[inline]
    pub fn next_sequence(&self) -> u64 {
        self.sequence + 1
    }

    /// Append an event; `sequence` is assigned here.
    pub fn record(&mut self, mut event: GcEvent) {
        self.sequence += 1;
        event.sequence = self.sequence;
        if self.verbose {
            tracing::info!(
                target: "strata_gc::trace",
                seq = event.sequence,
                kind = ?event.kind,
                reason = ?event.reason,
                pause = ?event.duration,
                before = %format_bytes(event.bytes_before as u64),
                after = %format_bytes(event.bytes_after as u64),
                promoted = event.promoted,
                survived = event.survived,
                evacuated_pages = event.pages_evacuated,
                released_pages = event.pages_released,
                "gc"
            );
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Events, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &GcEvent> {
        self.events.iter()
    }

    /// The most recent event.
    pub fn last(&self) -> Option<&GcEvent> {
        self.events.back()
    }

    /// Collections recorded since creation.
    #[inline]
    pub fn total(&self) -> u64 {
        self.sequence
    }
}

impl Default for GcTracer {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: GcKind) -> GcEvent {
        GcEvent {
            sequence: 0,
            kind,
            reason: GcReason::Testing,
            duration: Duration::from_micros(5),
            bytes_before: 1000,
            bytes_after: 400,
            promoted: 0,
            survived: 0,
            pages_evacuated: 0,
            pages_released: 0,
        }
    }

    #[test]
    fn test_ring_keeps_latest() {
        let mut tracer = GcTracer::new(2, false);
        tracer.record(event(GcKind::Minor));
        tracer.record(event(GcKind::Major));
        tracer.record(event(GcKind::Minor));

        assert_eq!(tracer.total(), 3);
        let sequences: Vec<_> = tracer.events().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![2, 3]);
        assert_eq!(tracer.last().map(|e| e.kind), Some(GcKind::Minor));
        assert_eq!(tracer.last().map(GcEvent::freed_bytes), Some(600));
    }
}
