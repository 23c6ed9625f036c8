//! Cumulative heap statistics.
//!
//! Counters are relaxed atomics: they are read for logging and tests, never
//! to make collection decisions. Per-cycle detail lives in the tracer.

use crate::collector::GcKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[inline]
fn bump(counter: &AtomicU64, amount: usize) {
    counter.fetch_add(amount as u64, Ordering::Relaxed);
}

#[inline]
fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

// =============================================================================
// Pauses
// =============================================================================

/// Count, total and worst pause of one collection kind.
#[derive(Debug, Default)]
pub struct PauseCounter {
    count: AtomicU64,
    total_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl PauseCounter {
    const fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            max_ns: AtomicU64::new(0),
        }
    }

    fn record(&self, pause: Duration) {
        let nanos = u64::try_from(pause.as_nanos()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(nanos, Ordering::Relaxed);
        self.max_ns.fetch_max(nanos, Ordering::Relaxed);
    }

    /// Collections recorded.
    pub fn count(&self) -> u64 {
        read(&self.count)
    }

    /// Sum of all pauses.
    pub fn total(&self) -> Duration {
        Duration::from_nanos(read(&self.total_ns))
    }

    /// Longest single pause.
    pub fn max(&self) -> Duration {
        Duration::from_nanos(read(&self.max_ns))
    }

    /// Mean pause, zero before the first collection.
    pub fn average(&self) -> Duration {
        match self.count() {
            0 => Duration::ZERO,
            count => Duration::from_nanos(read(&self.total_ns) / count),
        }
    }
}

// =============================================================================
// Heap Statistics
// =============================================================================

/// Running totals for one heap.
#[derive(Debug, Default)]
pub struct GcStats {
    allocated_bytes: AtomicU64,
    allocated_objects: AtomicU64,

    /// Scavenge pauses.
    pub scavenges: PauseCounter,
    /// Mark-compact pauses.
    pub mark_compacts: PauseCounter,
    marking_steps: AtomicU64,

    promoted_bytes: AtomicU64,
    promoted_objects: AtomicU64,
    survived_bytes: AtomicU64,

    evacuated_bytes: AtomicU64,
    aborted_pages: AtomicU64,
    swept_bytes: AtomicU64,
    released_pages: AtomicU64,

    young_size: AtomicU64,
    old_size: AtomicU64,
}

impl GcStats {
    /// All counters at zero.
    pub const fn new() -> Self {
        Self {
            allocated_bytes: AtomicU64::new(0),
            allocated_objects: AtomicU64::new(0),
            scavenges: PauseCounter::new(),
            mark_compacts: PauseCounter::new(),
            marking_steps: AtomicU64::new(0),
            promoted_bytes: AtomicU64::new(0),
            promoted_objects: AtomicU64::new(0),
            survived_bytes: AtomicU64::new(0),
            evacuated_bytes: AtomicU64::new(0),
            aborted_pages: AtomicU64::new(0),
            swept_bytes: AtomicU64::new(0),
            released_pages: AtomicU64::new(0),
            young_size: AtomicU64::new(0),
            old_size: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_allocation(&self, size: usize) {
        bump(&self.allocated_bytes, size);
        bump(&self.allocated_objects, 1);
    }

    pub(crate) fn record_collection(&self, kind: GcKind, pause: Duration) {
        match kind {
            GcKind::Minor => self.scavenges.record(pause),
            GcKind::Major => self.mark_compacts.record(pause),
        }
    }

    #[inline]
    pub(crate) fn record_promotion(&self, size: usize) {
        bump(&self.promoted_bytes, size);
        bump(&self.promoted_objects, 1);
    }

    #[inline]
    pub(crate) fn record_survival(&self, size: usize) {
        bump(&self.survived_bytes, size);
    }

    #[inline]
    pub(crate) fn record_marking_step(&self) {
        bump(&self.marking_steps, 1);
    }

    pub(crate) fn record_compaction(&self, evacuated: usize, aborted_pages: usize) {
        bump(&self.evacuated_bytes, evacuated);
        bump(&self.aborted_pages, aborted_pages);
    }

    pub(crate) fn record_sweep(&self, freed: usize, released_pages: usize) {
        bump(&self.swept_bytes, freed);
        bump(&self.released_pages, released_pages);
    }

    pub(crate) fn record_heap_size(&self, young: usize, old: usize) {
        self.young_size.store(young as u64, Ordering::Relaxed);
        self.old_size.store(old as u64, Ordering::Relaxed);
    }

    /// Bytes handed out by the allocator.
    pub fn allocated_bytes(&self) -> u64 {
        read(&self.allocated_bytes)
    }

    /// Allocations served.
    pub fn allocated_objects(&self) -> u64 {
        read(&self.allocated_objects)
    }

    /// Incremental marking steps taken.
    pub fn marking_steps(&self) -> u64 {
        read(&self.marking_steps)
    }

    /// Bytes and objects moved into the old generation.
    pub fn promoted(&self) -> (u64, u64) {
        (read(&self.promoted_bytes), read(&self.promoted_objects))
    }

    /// Bytes copied between semispaces.
    pub fn survived_bytes(&self) -> u64 {
        read(&self.survived_bytes)
    }

    /// Bytes moved off evacuation candidates.
    pub fn evacuated_bytes(&self) -> u64 {
        read(&self.evacuated_bytes)
    }

    /// Candidates swept in place after a failed evacuation.
    pub fn aborted_pages(&self) -> u64 {
        read(&self.aborted_pages)
    }

    /// Bytes reclaimed by sweeping.
    pub fn swept_bytes(&self) -> u64 {
        read(&self.swept_bytes)
    }

    /// Pages given back to the operating system.
    pub fn released_pages(&self) -> u64 {
        read(&self.released_pages)
    }

    /// Time spent in all pauses.
    pub fn total_gc_time(&self) -> Duration {
        self.scavenges.total() + self.mark_compacts.total()
    }

    /// Live bytes measured after the last collection.
    pub fn heap_usage(&self) -> u64 {
        read(&self.young_size) + read(&self.old_size)
    }

    /// Emit every counter as one `info` event.
    pub fn log_summary(&self) {
        let (promoted, _) = self.promoted();
        tracing::info!(
            target: "strata_gc::stats",
            allocations = self.allocated_objects(),
            allocated = %format_bytes(self.allocated_bytes()),
            scavenges = self.scavenges.count(),
            mark_compacts = self.mark_compacts.count(),
            max_scavenge = ?self.scavenges.max(),
            max_mark_compact = ?self.mark_compacts.max(),
            total_pause = ?self.total_gc_time(),
            promoted = %format_bytes(promoted),
            evacuated = %format_bytes(self.evacuated_bytes()),
            released_pages = self.released_pages(),
            live = %format_bytes(self.heap_usage()),
            "heap statistics"
        );
    }
}

/// Render a byte count with a binary unit.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{bytes} bytes");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Measures one phase and traces its length when stopped.
pub struct GcTimer {
    phase: &'static str,
    started: Instant,
}

impl GcTimer {
    /// Begin timing `phase`.
    pub fn start(phase: &'static str) -> Self {
        Self {
            phase,
            started: Instant::now(),
        }
    }

    /// Elapsed time since `start`.
    pub fn stop(self) -> Duration {
        let elapsed = self.started.elapsed();
        tracing::trace!(target: "strata_gc::timing", phase = self.phase, ?elapsed);
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_counters() {
        let stats = GcStats::new();
        stats.record_allocation(24);
        stats.record_allocation(40);
        assert_eq!(stats.allocated_bytes(), 64);
        assert_eq!(stats.allocated_objects(), 2);
    }

    #[test]
    fn test_pauses_are_split_by_kind() {
        let stats = GcStats::new();
        stats.record_collection(GcKind::Minor, Duration::from_micros(100));
        stats.record_collection(GcKind::Minor, Duration::from_micros(300));
        stats.record_collection(GcKind::Major, Duration::from_millis(2));

        assert_eq!(stats.scavenges.count(), 2);
        assert_eq!(stats.scavenges.average(), Duration::from_micros(200));
        assert_eq!(stats.scavenges.max(), Duration::from_micros(300));
        assert_eq!(stats.mark_compacts.count(), 1);
        assert_eq!(
            stats.total_gc_time(),
            Duration::from_micros(400) + Duration::from_millis(2)
        );
        assert_eq!(PauseCounter::default().average(), Duration::ZERO);
    }

    #[test]
    fn test_compaction_and_sweep_counters() {
        let stats = GcStats::new();
        stats.record_compaction(4096, 1);
        stats.record_sweep(512, 2);
        stats.record_heap_size(100, 200);
        stats.record_promotion(48);
        assert_eq!(stats.evacuated_bytes(), 4096);
        assert_eq!(stats.aborted_pages(), 1);
        assert_eq!(stats.swept_bytes(), 512);
        assert_eq!(stats.released_pages(), 2);
        assert_eq!(stats.heap_usage(), 300);
        assert_eq!(stats.promoted(), (48, 1));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(100), "100 bytes");
        assert_eq!(format_bytes(3 * 1024), "3.00 KB");
        assert_eq!(format_bytes(256 * 1024 * 1024), "256.00 MB");
        assert_eq!(format_bytes(5 << 30), "5.00 GB");
        assert_eq!(format_bytes(1 << 42), "4096.00 GB");
    }
}
