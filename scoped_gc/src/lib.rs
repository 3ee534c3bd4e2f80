//! Scoped GC
//!
//! A lexical-scope-bound memory reclamation scheme for compiled-language runtimes.
//!
//! # Architecture
//!
//! Every object is tagged with the nesting depth of the scope that created it.
//! Two cooperating parts manage those objects:
//!
//! - **Allocation Ledger**: an append/truncate-only stack of live objects in
//!   allocation order. Objects of the innermost open scope always form a
//!   contiguous suffix of the ledger.
//!
//! - **Scope Controller**: the [`ScopeContext`] depth counter and its
//!   enter/exit protocol. Exiting a scope walks the ledger suffix top-down,
//!   releases the scope's objects and promotes the scope's return value one
//!   level up.
//!
//! Collection on exit is O(k) in the number of objects the closing scope
//! allocated. There is no tracing, no cycle detection and no compaction.
//!
//! # Usage
//!
//! ```ignore
//! use scoped_gc::ScopeContext;
//!
//! let mut ctx = ScopeContext::with_defaults();
//!
//! let kept = ctx.scope(|outer| {
//!     let ret = outer.scope_returning(|inner| {
//!         let _tmp = inner.alloc(64)?;   // released when `inner` exits
//!         inner.alloc(16)                // promoted into `outer`
//!     })?;
//!     Ok::<_, scoped_gc::ScopeError>(ret.size())
//! })?;
//! ```
//!
//! # Threading
//!
//! A [`ScopeContext`] is neither `Send` nor `Sync`. Each thread of execution
//! owns its own context; [`runtime`] provides one per OS thread for generated
//! code.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collector;
pub mod config;
pub mod context;
pub mod ledger;
pub mod runtime;
pub mod scope;

mod alloc;
mod error;
mod stats;

// Re-exports for convenient access
pub use alloc::{ObjRef, ObjectHeader};
pub use collector::CollectResult;
pub use config::{ConfigError, FloatingPolicy, ScopeGcConfig};
pub use context::ScopeContext;
pub use error::{Result, ScopeError};
pub use ledger::Ledger;
pub use scope::{Local, Scope};
pub use stats::ScopeStats;

/// Scope nesting level. The root scope is [`ROOT_DEPTH`].
pub type Depth = u32;

/// Depth of the root scope a fresh context starts in.
pub const ROOT_DEPTH: Depth = 1;

/// Ownership state stored in every object header.
///
/// An object is either owned by an open scope, or marked as the return value
/// of an open scope and waiting to be handed to the one enclosing it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeTag {
    /// Owned by the scope at this depth (always `>= ROOT_DEPTH`).
    Owned(Depth),
    /// Return value of the scope at this depth; moves one level up when that
    /// scope exits. Exits of scopes nested inside it leave the mark alone.
    PendingPromotion(Depth),
}

impl ScopeTag {
    /// Owning depth, or `None` while the object is pending promotion.
    #[inline]
    pub fn depth(self) -> Option<Depth> {
        match self {
            ScopeTag::Owned(depth) => Some(depth),
            ScopeTag::PendingPromotion(_) => None,
        }
    }

    /// Check if the object is waiting to be promoted.
    #[inline]
    pub fn is_pending(self) -> bool {
        matches!(self, ScopeTag::PendingPromotion(_))
    }
}

impl std::fmt::Display for ScopeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeTag::Owned(depth) => write!(f, "owned@{}", depth),
            ScopeTag::PendingPromotion(depth) => write!(f, "pending@{}", depth),
        }
    }
}
