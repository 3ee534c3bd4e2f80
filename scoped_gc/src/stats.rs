//! Scope allocator statistics.
//!
//! Tracks allocation volume, reclamation, promotions and collection time
//! for monitoring and for tuning the ledger configuration.

use std::fmt;
use std::time::{Duration, Instant};

/// Statistics about scope allocation and collection activity.
#[derive(Debug, Clone, Default)]
pub struct ScopeStats {
    // =========================================================================
    // Allocation Statistics
    // =========================================================================
    /// Total payload bytes allocated since start.
    pub bytes_allocated: u64,
    /// Total objects allocated since start.
    pub objects_allocated: u64,
    /// Payload bytes currently live.
    pub live_bytes: u64,
    /// Objects currently live.
    pub live_objects: u64,

    // =========================================================================
    // Collection Statistics
    // =========================================================================
    /// Scopes entered.
    pub scopes_entered: u64,
    /// Scope exits (one collection each).
    pub collections: u64,
    /// Total time spent collecting (nanoseconds).
    pub collect_time_ns: u64,
    /// Objects released by collection.
    pub objects_freed: u64,
    /// Payload bytes released by collection.
    pub bytes_freed: u64,

    // =========================================================================
    // Promotion Statistics
    // =========================================================================
    /// Objects promoted because they were marked for return.
    pub objects_returned: u64,
    /// Still-referenced objects promoted at scope exit.
    pub floating_promoted: u64,

    // =========================================================================
    // Ledger Statistics
    // =========================================================================
    /// Largest ledger length observed.
    pub peak_ledger_len: usize,
}

impl ScopeStats {
    /// Create new empty statistics.
    pub const fn new() -> Self {
        Self {
            bytes_allocated: 0,
            objects_allocated: 0,
            live_bytes: 0,
            live_objects: 0,
            scopes_entered: 0,
            collections: 0,
            collect_time_ns: 0,
            objects_freed: 0,
            bytes_freed: 0,
            objects_returned: 0,
            floating_promoted: 0,
            peak_ledger_len: 0,
        }
    }

    /// Record an allocation.
    #[inline]
    pub fn record_allocation(&mut self, size: usize, ledger_len: usize) {
        self.bytes_allocated += size as u64;
        self.objects_allocated += 1;
        self.live_bytes += size as u64;
        self.live_objects += 1;
        self.peak_ledger_len = self.peak_ledger_len.max(ledger_len);
    }

    /// Record a released object.
    #[inline]
    pub fn record_free(&mut self, size: usize) {
        self.bytes_freed += size as u64;
        self.objects_freed += 1;
        self.live_bytes = self.live_bytes.saturating_sub(size as u64);
        self.live_objects = self.live_objects.saturating_sub(1);
    }

    /// Record a finished collection.
    pub fn record_collection(&mut self, duration: Duration) {
        self.collections += 1;
        self.collect_time_ns += duration.as_nanos() as u64;
    }

    /// Get total collection time.
    pub fn total_collect_time(&self) -> Duration {
        Duration::from_nanos(self.collect_time_ns)
    }

    /// Get average pause per scope exit.
    pub fn avg_pause(&self) -> Duration {
        if self.collections == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.collect_time_ns / self.collections)
    }

    /// Reset cumulative counters. Live counts describe the heap and are kept.
    pub fn reset(&mut self) {
        *self = Self {
            live_bytes: self.live_bytes,
            live_objects: self.live_objects,
            ..Self::new()
        };
    }

    /// Multi-line human-readable summary.
    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ScopeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Scope GC Statistics ===")?;
        writeln!(
            f,
            "Allocations: {} objects, {}",
            self.objects_allocated,
            format_bytes(self.bytes_allocated)
        )?;
        writeln!(
            f,
            "Live: {} objects, {}",
            self.live_objects,
            format_bytes(self.live_bytes)
        )?;
        writeln!(
            f,
            "Freed: {} objects, {}",
            self.objects_freed,
            format_bytes(self.bytes_freed)
        )?;
        writeln!(
            f,
            "Scopes: {} entered, {} collected",
            self.scopes_entered, self.collections
        )?;
        writeln!(
            f,
            "Collect Time: {:?} total ({:?} avg)",
            self.total_collect_time(),
            self.avg_pause()
        )?;
        write!(
            f,
            "Promotions: {} returned, {} floating; peak ledger {}",
            self.objects_returned, self.floating_promoted, self.peak_ledger_len
        )
    }
}

/// Format bytes in human-readable form.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Timer for measuring a collection.
pub(crate) struct CollectTimer {
    start: Instant,
}

impl CollectTimer {
    pub(crate) fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub(crate) fn stop(self) -> Duration {
        self.start.elapsed()
    }
}
