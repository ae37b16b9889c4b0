//! Processing counters for payload tools
//!
//! Lock-free atomic counters shared by worker threads that scan or trim
//! payloads in parallel. All operations use Relaxed ordering; a snapshot is
//! only meaningful once the workers have been joined.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters updated by scan/trim workers
#[derive(Debug)]
pub struct PayloadCounters {
    /// Payloads processed successfully
    pub payloads: AtomicU64,
    /// Payloads rejected with an error
    pub failures: AtomicU64,
    /// Records found by the scanner
    pub records_scanned: AtomicU64,
    /// Records excised by the trimmer
    pub records_removed: AtomicU64,
    /// Input bytes
    pub bytes_in: AtomicU64,
    /// Output bytes
    pub bytes_out: AtomicU64,
}

impl PayloadCounters {
    /// Create new zeroed counters
    pub fn new() -> Self {
        Self {
            payloads: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            records_scanned: AtomicU64::new(0),
            records_removed: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_payloads(&self) {
        self.payloads.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_records_scanned(&self, n: u64) {
        self.records_scanned.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_records_removed(&self, n: u64) {
        self.records_removed.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_bytes(&self, bytes_in: u64, bytes_out: u64) {
        self.bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes_out, Ordering::Relaxed);
    }

    /// Take a snapshot of current values
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            payloads: self.payloads.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            records_scanned: self.records_scanned.load(Ordering::Relaxed),
            records_removed: self.records_removed.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}

impl Default for PayloadCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of counter values at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub payloads: u64,
    pub failures: u64,
    pub records_scanned: u64,
    pub records_removed: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl CounterSnapshot {
    /// Output size as a fraction of input size (1.0 when nothing was read)
    pub fn size_ratio(&self) -> f64 {
        if self.bytes_in == 0 {
            return 1.0;
        }
        self.bytes_out as f64 / self.bytes_in as f64
    }

    /// Format a byte count as a human-readable string (KB, MB, etc.)
    pub fn format_bytes(bytes: u64) -> String {
        let b = bytes as f64;
        if b >= 1_000_000_000.0 {
            format!("{:.2} GB", b / 1_000_000_000.0)
        } else if b >= 1_000_000.0 {
            format!("{:.2} MB", b / 1_000_000.0)
        } else if b >= 1_000.0 {
            format!("{:.2} KB", b / 1_000.0)
        } else {
            format!("{} B", bytes)
        }
    }
}
