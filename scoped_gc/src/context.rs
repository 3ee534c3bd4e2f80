//! The scope controller.
//!
//! A [`ScopeContext`] owns one ledger and one depth counter. It is the
//! allocator state for a single thread of scope nesting: generated code
//! calls [`enter`](ScopeContext::enter), [`allocate`](ScopeContext::allocate),
//! [`mark_for_return`](ScopeContext::mark_for_return) and
//! [`exit`](ScopeContext::exit) in strict LIFO order.

use crate::alloc::{allocate_object, release_object, ObjRef};
use crate::collector::{CollectResult, ScopeCollector};
use crate::config::{ConfigError, ScopeGcConfig};
use crate::ledger::Ledger;
use crate::stats::{CollectTimer, ScopeStats};
use crate::{Depth, ScopeError, ScopeTag, ROOT_DEPTH};
use rustc_hash::FxHashSet;
use std::marker::PhantomData;

/// Allocator state for one thread of scope nesting.
pub struct ScopeContext {
    /// Configuration parameters.
    config: ScopeGcConfig,

    /// Live objects in allocation order.
    ledger: Ledger,

    /// Depth of the innermost open scope.
    depth: Depth,

    /// Scope-exit collector.
    collector: ScopeCollector,

    /// Allocation and collection statistics.
    stats: ScopeStats,

    /// Confines the context to the thread that created it.
    _not_send: PhantomData<*mut ()>,
}

impl ScopeContext {
    /// Create a context with the given configuration.
    pub fn new(config: ScopeGcConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    /// Create a context with default configuration.
    pub fn with_defaults() -> Self {
        Self::from_validated(ScopeGcConfig::default())
    }

    fn from_validated(config: ScopeGcConfig) -> Self {
        Self {
            ledger: Ledger::new(&config),
            collector: ScopeCollector::new(config.floating_policy),
            depth: ROOT_DEPTH,
            stats: ScopeStats::new(),
            config,
            _not_send: PhantomData,
        }
    }

    // =========================================================================
    // Scope Protocol
    // =========================================================================

    /// Open a nested scope.
    #[inline]
    pub fn enter(&mut self) {
        self.depth += 1;
        self.stats.scopes_entered += 1;
    }

    /// Allocate a zeroed object of `size` payload bytes in the open scope.
    ///
    /// Failed allocations are not recorded in the ledger.
    pub fn allocate(&mut self, size: usize) -> Result<ObjRef, ScopeError> {
        if self.config.max_heap_bytes != 0 {
            let live = self.stats.live_bytes as usize;
            if live.saturating_add(size) > self.config.max_heap_bytes {
                return Err(ScopeError::OutOfMemory { size });
            }
        }

        let obj = allocate_object(size, self.depth)?;
        self.ledger.append(obj);
        self.stats.record_allocation(size, self.ledger.len());

        log::trace!(
            target: "scoped_gc::alloc",
            "allocated {:?} ({} bytes) at depth {}",
            obj,
            size,
            self.depth
        );
        Ok(obj)
    }

    /// Mark `obj` as the return value of the open scope.
    ///
    /// The object survives the exit of the open scope by moving to the
    /// enclosing one. Scopes entered and exited in between leave the mark
    /// alone. Marking an object twice in the same scope is a no-op.
    ///
    /// # Safety
    ///
    /// `obj` must be a live object allocated by this context.
    pub unsafe fn mark_for_return(&mut self, obj: ObjRef) -> Result<(), ScopeError> {
        let header = obj.header();
        match header.tag() {
            ScopeTag::PendingPromotion(d) if d == self.depth => Ok(()),
            ScopeTag::Owned(d) if d == self.depth && d > ROOT_DEPTH => {
                header.set_tag(ScopeTag::PendingPromotion(d));
                Ok(())
            }
            tag => Err(ScopeError::NotInCurrentScope {
                tag,
                depth: self.depth,
            }),
        }
    }

    /// Close the open scope, collecting its objects.
    ///
    /// # Panics
    ///
    /// Panics on an exit at the root scope, on a floating object under
    /// [`FloatingPolicy::Reject`](crate::FloatingPolicy::Reject), and on a
    /// failed ledger check when `verify_ledger` is set. These are contract
    /// violations the ledger cannot recover from.
    pub fn exit(&mut self) -> CollectResult {
        match self.try_exit() {
            Ok(result) => result,
            Err(e) => {
                log::error!(target: "scoped_gc", "scope exit failed: {}", e);
                panic!("scope exit failed: {}", e);
            }
        }
    }

    /// Close the open scope, reporting contract violations instead of panicking.
    ///
    /// On [`ScopeUnderflow`](ScopeError::ScopeUnderflow) and
    /// [`FloatingObject`](ScopeError::FloatingObject) neither the ledger nor
    /// the depth counter is modified. [`LedgerCorrupted`](ScopeError::LedgerCorrupted)
    /// comes from the post-exit check under `verify_ledger`: the scope has
    /// already been collected and closed when it is reported.
    pub fn try_exit(&mut self) -> Result<CollectResult, ScopeError> {
        if self.depth <= ROOT_DEPTH {
            return Err(ScopeError::ScopeUnderflow);
        }

        let result = self.collect()?;
        self.depth -= 1;

        if self.config.verify_ledger {
            self.verify()?;
        }
        Ok(result)
    }

    /// Collect the open scope. The depth counter is left unchanged.
    fn collect(&mut self) -> Result<CollectResult, ScopeError> {
        let timer = CollectTimer::start();

        let plan = self.collector.plan(&self.ledger, self.depth)?;
        let result = self
            .collector
            .apply(&mut self.ledger, self.depth, plan, &mut self.stats);

        let elapsed = timer.stop();
        self.stats.record_collection(elapsed);

        if self.config.trace {
            log::debug!(
                target: "scoped_gc::collector",
                "depth {}: scanned {}, freed {} ({} bytes), returned {}, floating {} in {:?}; ledger {}/{}",
                self.depth,
                result.scanned,
                result.objects_freed,
                result.bytes_freed,
                result.objects_returned,
                result.floating_promoted,
                elapsed,
                self.ledger.len(),
                self.ledger.capacity()
            );
        }
        Ok(result)
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Check the ledger invariants.
    ///
    /// - owning and marking depths never decrease from bottom to top, and
    ///   never exceed the open depth;
    /// - no return mark belongs to the root scope;
    /// - no object is recorded twice;
    /// - the live-byte count matches the ledger contents.
    pub fn verify(&self) -> Result<(), ScopeError> {
        let mut seen = FxHashSet::default();
        let mut last_depth = ROOT_DEPTH;
        let mut live_bytes = 0u64;

        for (index, obj) in self.ledger.iter().enumerate() {
            if !seen.insert(obj) {
                return Err(ScopeError::LedgerCorrupted {
                    index,
                    reason: "object recorded twice",
                });
            }

            // SAFETY: every ledger entry is a live object.
            let header = unsafe { obj.header() };
            live_bytes += header.size() as u64;

            let depth = match header.tag() {
                ScopeTag::PendingPromotion(d) if d <= ROOT_DEPTH => {
                    return Err(ScopeError::LedgerCorrupted {
                        index,
                        reason: "pending entry at root depth",
                    });
                }
                ScopeTag::Owned(d) | ScopeTag::PendingPromotion(d) => d,
            };
            if depth < ROOT_DEPTH || depth > self.depth {
                return Err(ScopeError::LedgerCorrupted {
                    index,
                    reason: "depth outside the open scopes",
                });
            }
            if depth < last_depth {
                return Err(ScopeError::LedgerCorrupted {
                    index,
                    reason: "depth decreases",
                });
            }
            last_depth = depth;
        }

        if live_bytes != self.stats.live_bytes {
            return Err(ScopeError::LedgerCorrupted {
                index: self.ledger.len(),
                reason: "live byte count mismatch",
            });
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Depth of the innermost open scope.
    #[inline]
    pub fn depth(&self) -> Depth {
        self.depth
    }

    /// Get the ledger.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Check if an object is currently recorded. O(n).
    pub fn contains(&self, obj: ObjRef) -> bool {
        self.ledger.contains(obj)
    }

    /// Get the configuration.
    pub fn config(&self) -> &ScopeGcConfig {
        &self.config
    }

    /// Get statistics.
    pub fn stats(&self) -> &ScopeStats {
        &self.stats
    }

    /// Reset the cumulative statistics. Live counts are kept.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }
}

impl Default for ScopeContext {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ScopeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeContext")
            .field("depth", &self.depth)
            .field("ledger", &self.ledger)
            .finish()
    }
}

impl Drop for ScopeContext {
    fn drop(&mut self) {
        // Release everything still recorded, whatever its scope or count.
        let remaining = self.ledger.take_all();
        if !remaining.is_empty() {
            log::debug!(
                target: "scoped_gc",
                "releasing {} objects at context teardown (depth {})",
                remaining.len(),
                self.depth
            );
        }
        for obj in remaining {
            // SAFETY: each object appears once and is released once.
            unsafe { release_object(obj) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FloatingPolicy;

    fn strict() -> ScopeContext {
        ScopeContext::new(ScopeGcConfig {
            verify_ledger: true,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_new_context_is_at_root() {
        let ctx = ScopeContext::with_defaults();
        assert_eq!(ctx.depth(), ROOT_DEPTH);
        assert!(ctx.ledger().is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ScopeGcConfig {
            scale_factor: 0,
            ..Default::default()
        };
        assert!(matches!(
            ScopeContext::new(config),
            Err(ConfigError::InvalidScaleFactor)
        ));
    }

    #[test]
    fn test_collect_evicts_scope_objects() {
        let mut ctx = strict();
        ctx.enter();
        let o1 = ctx.allocate(8).unwrap();
        let o2 = ctx.allocate(8).unwrap();
        assert_eq!(unsafe { o1.tag() }, ScopeTag::Owned(2));
        assert_eq!(unsafe { o2.ref_count() }, 0);

        let result = ctx.exit();

        assert_eq!(result.objects_freed, 2);
        assert_eq!(ctx.depth(), 1);
        assert!(ctx.ledger().is_empty());
        assert_eq!(ctx.stats().live_objects, 0);
    }

    #[test]
    fn test_promotion_scenario() {
        let mut ctx = strict();
        ctx.enter();
        let o1 = ctx.allocate(16).unwrap();
        unsafe { ctx.mark_for_return(o1).unwrap() };
        assert_eq!(unsafe { o1.tag() }, ScopeTag::PendingPromotion(2));

        let result = ctx.exit();

        assert_eq!(result.objects_returned, 1);
        assert_eq!(ctx.depth(), 1);
        assert!(ctx.contains(o1));
        assert_eq!(unsafe { o1.depth() }, Some(1));
    }

    #[test]
    fn test_mark_for_return_rejects_enclosing_object() {
        let mut ctx = strict();
        ctx.enter();
        let outer = ctx.allocate(8).unwrap();
        ctx.enter();

        let err = unsafe { ctx.mark_for_return(outer) }.unwrap_err();
        assert_eq!(
            err,
            ScopeError::NotInCurrentScope {
                tag: ScopeTag::Owned(2),
                depth: 3
            }
        );
        assert_eq!(unsafe { outer.tag() }, ScopeTag::Owned(2));

        ctx.exit();
        ctx.exit();
    }

    #[test]
    fn test_mark_for_return_at_root_is_rejected() {
        let mut ctx = strict();
        let obj = ctx.allocate(8).unwrap();
        assert!(unsafe { ctx.mark_for_return(obj) }.is_err());
    }

    #[test]
    fn test_try_exit_at_root_underflows() {
        let mut ctx = strict();
        assert_eq!(ctx.try_exit(), Err(ScopeError::ScopeUnderflow));
        assert_eq!(ctx.depth(), ROOT_DEPTH);
    }

    #[test]
    #[should_panic(expected = "scope exit at root depth")]
    fn test_exit_at_root_panics() {
        let mut ctx = strict();
        ctx.exit();
    }

    #[test]
    fn test_floating_object_is_promoted_by_default() {
        let mut ctx = strict();
        ctx.enter();
        let obj = ctx.allocate(8).unwrap();
        unsafe { obj.retain() };

        let result = ctx.exit();

        assert_eq!(result.floating_promoted, 1);
        assert_eq!(unsafe { obj.depth() }, Some(1));
        assert_eq!(ctx.stats().floating_promoted, 1);
        assert!(ctx.contains(obj));
    }

    #[test]
    fn test_floating_object_rejected_leaves_state() {
        let mut ctx = ScopeContext::new(ScopeGcConfig {
            floating_policy: FloatingPolicy::Reject,
            verify_ledger: true,
            ..Default::default()
        })
        .unwrap();
        ctx.enter();
        let kept = ctx.allocate(8).unwrap();
        let _dead = ctx.allocate(8).unwrap();
        unsafe { kept.retain() };

        assert_eq!(
            ctx.try_exit(),
            Err(ScopeError::FloatingObject {
                depth: 2,
                ref_count: 1
            })
        );
        assert_eq!(ctx.depth(), 2);
        assert_eq!(ctx.ledger().len(), 2);

        unsafe { kept.release() };
        assert_eq!(ctx.exit().objects_freed, 2);
    }

    #[test]
    fn test_heap_limit_fails_without_registering() {
        let mut ctx = ScopeContext::new(ScopeGcConfig {
            max_heap_bytes: 64,
            ..Default::default()
        })
        .unwrap();
        ctx.enter();
        ctx.allocate(48).unwrap();

        assert_eq!(ctx.allocate(32), Err(ScopeError::OutOfMemory { size: 32 }));
        assert_eq!(ctx.ledger().len(), 1);

        ctx.exit();
        assert!(ctx.allocate(64).is_ok());
    }

    #[test]
    fn test_verify_detects_bad_depth() {
        let mut ctx = strict();
        ctx.enter();
        let obj = ctx.allocate(8).unwrap();
        unsafe { obj.header().set_tag(ScopeTag::Owned(7)) };

        assert!(matches!(
            ctx.verify(),
            Err(ScopeError::LedgerCorrupted { index: 0, .. })
        ));

        unsafe { obj.header().set_tag(ScopeTag::Owned(2)) };
        assert!(ctx.verify().is_ok());
        ctx.exit();
    }

    #[test]
    fn test_empty_nested_scope_keeps_return_mark() {
        let mut ctx = strict();
        ctx.enter();
        let r = ctx.allocate(8).unwrap();
        let _tmp = ctx.allocate(8).unwrap();
        unsafe { ctx.mark_for_return(r).unwrap() };

        ctx.enter();
        let result = ctx.exit();

        assert_eq!(result, CollectResult::default());
        assert_eq!(unsafe { r.tag() }, ScopeTag::PendingPromotion(2));

        let result = ctx.exit();
        assert_eq!(result.objects_returned, 1);
        assert_eq!(result.objects_freed, 1);
        assert_eq!(unsafe { r.depth() }, Some(1));
        assert!(ctx.contains(r));
    }

    #[test]
    fn test_mark_for_return_rejects_enclosing_mark() {
        let mut ctx = strict();
        ctx.enter();
        let r = ctx.allocate(8).unwrap();
        unsafe { ctx.mark_for_return(r).unwrap() };
        ctx.enter();

        assert_eq!(
            unsafe { ctx.mark_for_return(r) },
            Err(ScopeError::NotInCurrentScope {
                tag: ScopeTag::PendingPromotion(2),
                depth: 3
            })
        );

        ctx.exit();
        ctx.exit();
    }

    #[test]
    fn test_try_exit_reports_failed_verification() {
        let mut ctx = strict();
        ctx.enter();
        ctx.allocate(8).unwrap();
        ctx.enter();
        ctx.stats.live_bytes += 1;

        assert_eq!(
            ctx.try_exit(),
            Err(ScopeError::LedgerCorrupted {
                index: 1,
                reason: "live byte count mismatch"
            })
        );
        assert_eq!(ctx.depth(), 2);

        ctx.stats.live_bytes -= 1;
        ctx.exit();
    }

    #[test]
    #[should_panic(expected = "live byte count mismatch")]
    fn test_exit_panics_on_failed_verification() {
        let mut ctx = strict();
        ctx.enter();
        ctx.stats.live_bytes += 1;
        ctx.exit();
    }

    #[test]
    fn test_reset_stats_keeps_live_counts() {
        let mut ctx = strict();
        ctx.enter();
        ctx.allocate(8).unwrap();
        ctx.allocate(4).unwrap();

        ctx.reset_stats();

        assert_eq!(ctx.stats().objects_allocated, 0);
        assert_eq!(ctx.stats().live_objects, 2);
        assert_eq!(ctx.stats().live_bytes, 12);
        assert!(ctx.verify().is_ok());
        ctx.exit();
    }

    #[test]
    fn test_drop_releases_root_objects() {
        let mut ctx = strict();
        ctx.allocate(8).unwrap();
        ctx.allocate(8).unwrap();
        assert_eq!(ctx.stats().live_objects, 2);
        drop(ctx);
    }
}
