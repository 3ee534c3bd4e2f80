//! Scope-exit collection.
//!
//! Collection runs in two passes over the closing scope's ledger suffix:
//! 1. Plan: scan top-down until the first entry owned or marked by an
//!    enclosing scope, counting entries and checking the floating-object policy. Nothing is
//!    mutated, so a rejected exit leaves the context untouched.
//! 2. Apply: truncate the suffix, releasing unreferenced objects, re-tagging
//!    return values (and floating objects under `Promote`) to the enclosing
//!    depth, then re-append those in their original allocation order.
//!
//! ```text
//!  ledger (bottom → top)           depth 3 exits
//!  ┌────┬────┬────┬────┬────┐      ┌────┬────┬────┐
//!  │ a1 │ b2 │ c3 │ r* │ d3 │ ───▶ │ a1 │ b2 │ r2 │
//!  └────┴────┴────┴────┴────┘      └────┴────┴────┘
//!  c3, d3 released; r* (pending) re-tagged to depth 2 and re-appended
//! ```
//!
//! Both passes are O(k) in the number of entries the closing scope holds.

use crate::alloc::{release_object, ObjRef};
use crate::config::FloatingPolicy;
use crate::ledger::Ledger;
use crate::stats::ScopeStats;
use crate::{Depth, ScopeError, ScopeTag};
use smallvec::SmallVec;

/// Result of one scope-exit collection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectResult {
    /// Ledger entries removed by the scan.
    pub scanned: usize,
    /// Objects whose storage was released.
    pub objects_freed: usize,
    /// Payload bytes released.
    pub bytes_freed: usize,
    /// Return values promoted to the enclosing scope.
    pub objects_returned: usize,
    /// Still-referenced objects promoted to the enclosing scope.
    pub floating_promoted: usize,
}

impl CollectResult {
    /// Objects that survived the exit by promotion.
    pub fn promoted(&self) -> usize {
        self.objects_returned + self.floating_promoted
    }
}

/// Outcome of the read-only scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CollectPlan {
    /// Entries belonging to the closing scope (the truncation count).
    pub scanned: usize,
    /// Entries marked for return.
    pub returns: usize,
}

/// Collector for the innermost open scope.
pub struct ScopeCollector {
    /// Reused buffer of objects to re-append, in scan (top-down) order.
    promoted: SmallVec<[ObjRef; 4]>,
    /// Handling of referenced objects in a closing scope.
    policy: FloatingPolicy,
}

impl ScopeCollector {
    /// Create a collector with the given floating-object policy.
    pub fn new(policy: FloatingPolicy) -> Self {
        Self {
            promoted: SmallVec::new(),
            policy,
        }
    }

    /// The floating-object policy in effect.
    pub fn policy(&self) -> FloatingPolicy {
        self.policy
    }

    /// Scan the closing scope's suffix without mutating anything.
    pub(crate) fn plan(&self, ledger: &Ledger, depth: Depth) -> Result<CollectPlan, ScopeError> {
        let mut plan = CollectPlan {
            scanned: 0,
            returns: 0,
        };

        for obj in ledger.scan_top() {
            // SAFETY: every ledger entry is a live object.
            let header = unsafe { obj.header() };
            match header.tag() {
                ScopeTag::Owned(d) if d >= depth => {
                    let ref_count = header.ref_count();
                    if ref_count != 0 && self.policy == FloatingPolicy::Reject {
                        return Err(ScopeError::FloatingObject {
                            depth: d,
                            ref_count,
                        });
                    }
                }
                ScopeTag::PendingPromotion(d) if d >= depth => plan.returns += 1,
                ScopeTag::Owned(_) | ScopeTag::PendingPromotion(_) => break,
            }
            plan.scanned += 1;
        }

        Ok(plan)
    }

    /// Remove the planned suffix, releasing or promoting each entry.
    ///
    /// `depth` is the depth of the closing scope; survivors are re-tagged to
    /// `depth - 1`.
    pub(crate) fn apply(
        &mut self,
        ledger: &mut Ledger,
        depth: Depth,
        plan: CollectPlan,
        stats: &mut ScopeStats,
    ) -> CollectResult {
        debug_assert!(depth > crate::ROOT_DEPTH, "collecting the root scope");

        let enclosing = ScopeTag::Owned(depth - 1);
        let mut result = CollectResult {
            scanned: plan.scanned,
            ..Default::default()
        };

        if plan.returns > 1 {
            log::warn!(
                target: "scoped_gc::collector",
                "{} objects marked for return from depth {}; promoting all",
                plan.returns,
                depth
            );
        }

        let promoted = &mut self.promoted;
        promoted.clear();

        ledger.truncate(plan.scanned, |obj| {
            // SAFETY: entries stay live until released below.
            let header = unsafe { obj.header() };
            match header.tag() {
                ScopeTag::PendingPromotion(_) => {
                    header.set_tag(enclosing);
                    promoted.push(obj);
                    result.objects_returned += 1;
                }
                ScopeTag::Owned(owner) if header.ref_count() != 0 => {
                    log::warn!(
                        target: "scoped_gc::collector",
                        "floating object {:?} (depth {}, {} refs) promoted to depth {}",
                        obj,
                        owner,
                        header.ref_count(),
                        depth - 1
                    );
                    header.set_tag(enclosing);
                    promoted.push(obj);
                    result.floating_promoted += 1;
                }
                ScopeTag::Owned(_) => {
                    let size = header.size();
                    // SAFETY: removed from the ledger and unreferenced.
                    unsafe { release_object(obj) };
                    stats.record_free(size);
                    result.objects_freed += 1;
                    result.bytes_freed += size;
                }
            }
        });

        for obj in promoted.drain(..).rev() {
            ledger.append(obj);
        }

        stats.objects_returned += result.objects_returned as u64;
        stats.floating_promoted += result.floating_promoted as u64;
        result
    }
}
