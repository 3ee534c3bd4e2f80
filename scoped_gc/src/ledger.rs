//! The allocation ledger.
//!
//! An append/truncate-only stack of live objects in allocation order. The
//! ledger grows and shrinks its backing buffer by a fixed scale factor so
//! that steady-state churn settles on a bounded capacity.

use crate::alloc::ObjRef;
use crate::config::ScopeGcConfig;

/// Ordered record of live allocations.
///
/// Entries are only ever pushed on top or removed from the top. Capacity is
/// managed explicitly rather than left to `Vec`'s amortized growth so that
/// growth and shrink points are deterministic.
pub struct Ledger {
    /// Live entries, bottom (oldest) first.
    entries: Vec<ObjRef>,
    /// Logical capacity of the backing buffer.
    capacity: usize,
    /// Capacity reserved by the first append.
    initial_capacity: usize,
    /// Growth and shrink factor.
    scale_factor: usize,
    /// Shrink once `len < capacity / shrink_divisor`.
    shrink_divisor: usize,
}

impl Ledger {
    /// Create an empty ledger. No memory is reserved until the first append.
    pub fn new(config: &ScopeGcConfig) -> Self {
        Self {
            entries: Vec::new(),
            capacity: 0,
            initial_capacity: config.initial_capacity.max(1),
            scale_factor: config.scale_factor.max(2),
            shrink_divisor: config.shrink_divisor.max(1),
        }
    }

    /// Push an entry on top. Amortized O(1).
    pub fn append(&mut self, obj: ObjRef) {
        if self.entries.len() == self.capacity {
            let new_capacity = if self.capacity == 0 {
                self.initial_capacity
            } else {
                self.capacity.saturating_mul(self.scale_factor)
            };
            self.resize(new_capacity);
        }
        self.entries.push(obj);
    }

    /// Remove the top `n` entries, handing each to `release` top-down.
    ///
    /// Shrinks the backing buffer by one scale step when the remaining length
    /// falls under `capacity / shrink_divisor` and the capacity is above the
    /// shrink floor.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the ledger length.
    pub fn truncate<F>(&mut self, n: usize, mut release: F)
    where
        F: FnMut(ObjRef),
    {
        assert!(
            n <= self.entries.len(),
            "cannot truncate {} entries from a ledger of {}",
            n,
            self.entries.len()
        );

        let new_len = self.entries.len() - n;
        for obj in self.entries.drain(new_len..).rev() {
            release(obj);
        }

        let floor = self.scale_factor.saturating_mul(self.initial_capacity);
        if self.capacity > floor && self.entries.len() < self.capacity / self.shrink_divisor {
            let new_capacity = self.capacity / self.scale_factor;
            log::trace!(
                target: "scoped_gc::ledger",
                "shrinking ledger {} -> {}",
                self.capacity,
                new_capacity
            );
            self.resize(new_capacity);
        }
    }

    /// Iterate from the most recent entry downwards.
    pub fn scan_top(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.entries.iter().rev().copied()
    }

    /// Iterate from the oldest entry upwards.
    pub fn iter(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.entries.iter().copied()
    }

    /// Check if an object is recorded. O(n), for diagnostics.
    pub fn contains(&self, obj: ObjRef) -> bool {
        self.entries.contains(&obj)
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the ledger is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current backing capacity in entries.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take every entry out, bottom first. Capacity is released.
    pub(crate) fn take_all(&mut self) -> Vec<ObjRef> {
        self.capacity = 0;
        std::mem::take(&mut self.entries)
    }

    fn resize(&mut self, new_capacity: usize) {
        if new_capacity > self.entries.capacity() {
            self.entries
                .reserve_exact(new_capacity - self.entries.len());
        } else {
            self.entries.shrink_to(new_capacity);
        }
        self.capacity = new_capacity;
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
