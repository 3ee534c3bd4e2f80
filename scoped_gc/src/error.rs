//! Errors reported by the scope allocator.

use crate::{Depth, ScopeTag};
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ScopeError>;

/// Error type for allocation and scope-protocol failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    /// The system allocator (or the configured heap limit) refused the request.
    #[error("out of memory allocating {size} bytes")]
    OutOfMemory {
        /// Requested payload size.
        size: usize,
    },

    /// Header plus payload does not form a valid layout.
    #[error("invalid allocation size: {size} bytes")]
    InvalidSize {
        /// Requested payload size.
        size: usize,
    },

    /// Only objects owned by the open scope can be marked as its return value.
    #[error("object tagged {tag} is not owned by the open scope at depth {depth}")]
    NotInCurrentScope {
        /// Tag found on the object.
        tag: ScopeTag,
        /// Depth of the open scope.
        depth: Depth,
    },

    /// More exits than enters.
    #[error("scope exit at root depth")]
    ScopeUnderflow,

    /// A still-referenced object was found in a closing scope.
    #[error("floating object at depth {depth} with {ref_count} outstanding references")]
    FloatingObject {
        /// Depth the object was owned by.
        depth: Depth,
        /// Outstanding external references.
        ref_count: u32,
    },

    /// The ledger ordering invariant does not hold.
    #[error("ledger corrupted at entry {index}: {reason}")]
    LedgerCorrupted {
        /// Ledger position of the offending entry.
        index: usize,
        /// What was wrong with it.
        reason: &'static str,
    },
}

impl From<ScopeError> for std::io::Error {
    fn from(e: ScopeError) -> std::io::Error {
        match e {
            ScopeError::OutOfMemory { .. } => std::io::ErrorKind::OutOfMemory.into(),
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}
