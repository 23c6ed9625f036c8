//! Heap configuration parameters.
//!
//! Every size and threshold is tunable. Promotion age and the size-class
//! boundaries of the free list are policy, not semantics; the defaults are
//! reasonable for general script workloads.

use crate::memory::{CHUNK_SIZE, MAX_REGULAR_OBJECT_SIZE};
use thiserror::Error;

/// Handler invoked on unrecoverable out-of-memory. Must not return.
pub type OomHandler = fn(&str) -> !;

/// Configuration for a [`Heap`](crate::Heap).
///
/// # Example
///
/// ```
/// use strata_gc::HeapConfig;
///
/// let config = HeapConfig {
///     semi_space_size: 4 * 1024 * 1024,
///     promotion_age: 3,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Bytes per semispace, rounded up to whole chunks. New space commits
    /// twice this.
    pub semi_space_size: usize,
    /// Scavenges survived before promotion. A survivor is promoted once
    /// `age + 1 >= promotion_age`; 1 promotes on first survival.
    pub promotion_age: u8,

    /// Old-generation bytes committed before the first major collection.
    pub initial_old_size: usize,
    /// Ceiling on committed old-generation bytes, 0 for none.
    pub max_old_size: usize,
    /// Multiplier on the post-collection size that sets the next limit.
    pub old_growth_factor: f64,
    /// A page whose free fraction exceeds this is evacuated. 1.0 turns
    /// compaction off.
    pub compaction_threshold: f64,
    /// Evacuation candidates per major collection.
    pub max_evacuation_candidates: usize,

    /// Size above which an object gets its own large-object page.
    pub large_object_threshold: usize,

    /// Old-generation usage ratio that starts marking.
    pub major_gc_threshold: f64,
    /// Mark in steps between allocations instead of all in the pause.
    pub incremental_marking: bool,
    /// Object bytes visited by one marking step.
    pub marking_step_bytes: usize,
    /// Threads draining the worklist during the final pause.
    pub marker_threads: usize,

    /// One `info` line per collection.
    pub trace_gc: bool,
    /// Run the heap verifier after every collection.
    pub verify_heap: bool,
    /// Fatal out-of-memory hook. Never returns.
    pub oom_handler: OomHandler,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            semi_space_size: 1 << 20,
            promotion_age: 2,
            initial_old_size: 16 << 20,
            max_old_size: 0,
            old_growth_factor: 1.5,
            compaction_threshold: 0.3,
            max_evacuation_candidates: 16,
            large_object_threshold: 32 << 10,
            major_gc_threshold: 0.75,
            incremental_marking: true,
            marking_step_bytes: 64 << 10,
            marker_threads: default_marker_threads(),
            trace_gc: false,
            verify_heap: cfg!(debug_assertions),
            oom_handler: abort_on_out_of_memory,
        }
    }
}

impl HeapConfig {
    /// Half-size young generation, a 4MB old start and eager compaction.
    pub fn low_memory() -> Self {
        Self {
            semi_space_size: 512 << 10,
            initial_old_size: 4 << 20,
            large_object_threshold: 16 << 10,
            compaction_threshold: 0.2,
            ..Default::default()
        }
    }

    /// Large generations, late promotion and marking only in the pause.
    pub fn high_throughput() -> Self {
        Self {
            semi_space_size: 8 << 20,
            initial_old_size: 64 << 20,
            promotion_age: 3,
            major_gc_threshold: 0.85,
            incremental_marking: false,
            ..Default::default()
        }
    }

    /// Short scavenges and small marking steps that start early.
    pub fn low_latency() -> Self {
        Self {
            semi_space_size: 512 << 10,
            incremental_marking: true,
            marking_step_bytes: 16 << 10,
            major_gc_threshold: 0.6,
            ..Default::default()
        }
    }

    /// Small, deterministic configuration for tests.
    ///
    /// One-page semispaces, single-threaded marking, no incremental marking
    /// and heap verification after every collection.
    pub fn for_testing() -> Self {
        Self {
            semi_space_size: CHUNK_SIZE,
            initial_old_size: 4 * CHUNK_SIZE,
            large_object_threshold: 16 * 1024,
            incremental_marking: false,
            marker_threads: 1,
            verify_heap: true,
            ..Default::default()
        }
    }

    /// Number of chunks backing each semispace.
    #[inline]
    pub fn semi_space_pages(&self) -> usize {
        self.semi_space_size.div_ceil(CHUNK_SIZE)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.semi_space_size < CHUNK_SIZE {
            return Err(ConfigError::SemiSpaceTooSmall);
        }
        if self.promotion_age == 0 {
            return Err(ConfigError::InvalidPromotionAge);
        }
        if self.max_old_size != 0 && self.max_old_size < self.initial_old_size {
            return Err(ConfigError::MaxBelowInitial);
        }
        if !(self.old_growth_factor >= 1.0) {
            return Err(ConfigError::InvalidGrowthFactor);
        }
        if !(self.compaction_threshold > 0.0 && self.compaction_threshold <= 1.0) {
            return Err(ConfigError::InvalidRatio("compaction_threshold"));
        }
        if !(self.major_gc_threshold > 0.0 && self.major_gc_threshold <= 1.0) {
            return Err(ConfigError::InvalidRatio("major_gc_threshold"));
        }
        if self.large_object_threshold < 1024
            || self.large_object_threshold > MAX_REGULAR_OBJECT_SIZE
        {
            return Err(ConfigError::InvalidLargeObjectThreshold);
        }
        if self.marker_threads == 0 {
            return Err(ConfigError::NoMarkerThreads);
        }
        if self.marking_step_bytes == 0 {
            return Err(ConfigError::InvalidMarkingStep);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Semispace smaller than one chunk.
    #[error("semispace size must be at least one chunk ({CHUNK_SIZE} bytes)")]
    SemiSpaceTooSmall,
    /// Promotion age of zero.
    #[error("promotion age must be at least 1")]
    InvalidPromotionAge,
    /// Hard cap below the initial size.
    #[error("max old size must be 0 or at least the initial old size")]
    MaxBelowInitial,
    /// Growth factor below 1.
    #[error("old growth factor must be at least 1.0")]
    InvalidGrowthFactor,
    /// A ratio outside (0, 1].
    #[error("{0} must be in (0, 1]")]
    InvalidRatio(&'static str),
    /// Large-object threshold outside the supported range.
    #[error("large object threshold must be between 1KB and {MAX_REGULAR_OBJECT_SIZE} bytes")]
    InvalidLargeObjectThreshold,
    /// No marker threads.
    #[error("at least one marker thread is required")]
    NoMarkerThreads,
    /// Zero marking step.
    #[error("marking step must be non-zero")]
    InvalidMarkingStep,
}

/// Default OOM handler: log and abort.
fn abort_on_out_of_memory(message: &str) -> ! {
    tracing::error!(target: "strata_gc::oom", "fatal out of memory: {message}");
    std::process::abort()
}

/// One marker per core, leaving a core for the mutator.
fn default_marker_threads() -> usize {
    std::thread::available_parallelism()
        .map_or(1, |cores| cores.get().saturating_sub(1))
        .max(1)
}
