//! Per-thread runtime entry points for generated code.
//!
//! Each OS thread lazily gets its own [`ScopeContext`], configured from the
//! `SCOPED_GC_*` environment variables. The free functions mirror the
//! context's protocol; the `extern "C"` symbols expose the same protocol to
//! compiled code.
//!
//! Allocation failure through the C ABI is fatal: the process aborts via
//! [`std::alloc::handle_alloc_error`].

use crate::alloc::{ObjRef, ObjectHeader, HEADER_SIZE, OBJECT_ALIGN};
use crate::collector::CollectResult;
use crate::config::ScopeGcConfig;
use crate::context::ScopeContext;
use crate::ScopeError;
use std::alloc::Layout;
use std::cell::RefCell;

thread_local! {
    static CONTEXT: RefCell<ScopeContext> = RefCell::new(thread_context());
}

fn thread_context() -> ScopeContext {
    let config = ScopeGcConfig::from_env();
    match ScopeContext::new(config) {
        Ok(ctx) => ctx,
        Err(e) => {
            log::warn!(
                target: "scoped_gc::runtime",
                "invalid SCOPED_GC_* configuration ({}); using defaults",
                e
            );
            ScopeContext::with_defaults()
        }
    }
}

/// Run `f` with this thread's context.
///
/// # Panics
///
/// Panics if called re-entrantly from inside `f`.
pub fn with_context<R>(f: impl FnOnce(&mut ScopeContext) -> R) -> R {
    CONTEXT.with(|ctx| f(&mut ctx.borrow_mut()))
}

/// Open a nested scope on this thread.
pub fn enter() {
    with_context(|ctx| ctx.enter())
}

/// Allocate in this thread's open scope.
pub fn allocate(size: usize) -> Result<ObjRef, ScopeError> {
    with_context(|ctx| ctx.allocate(size))
}

/// Mark `obj` as the return value of this thread's open scope.
///
/// # Safety
///
/// `obj` must be a live object allocated on this thread.
pub unsafe fn mark_for_return(obj: ObjRef) -> Result<(), ScopeError> {
    with_context(|ctx| ctx.mark_for_return(obj))
}

/// Close this thread's open scope.
///
/// # Panics
///
/// Panics on a contract violation, see [`ScopeContext::exit`].
pub fn exit() -> CollectResult {
    with_context(|ctx| ctx.exit())
}

// =============================================================================
// C ABI
// =============================================================================

/// Open a nested scope.
#[no_mangle]
pub extern "C" fn scoped_gc_enter() {
    enter();
}

/// Allocate `size` zeroed payload bytes; returns the object header.
///
/// The payload starts `scoped_gc_header_size()` bytes after the header.
#[no_mangle]
pub extern "C" fn scoped_gc_alloc(size: usize) -> *mut ObjectHeader {
    match allocate(size) {
        Ok(obj) => obj.as_ptr(),
        Err(e) => {
            log::error!(target: "scoped_gc::runtime", "allocation failed: {}", e);
            let layout = Layout::from_size_align(size.saturating_add(HEADER_SIZE), OBJECT_ALIGN)
                .unwrap_or_else(|_| Layout::new::<ObjectHeader>());
            std::alloc::handle_alloc_error(layout)
        }
    }
}

/// Mark an object as the open scope's return value. Returns `false` if the
/// object is not owned by the open scope.
///
/// # Safety
///
/// `obj` must be null or a live object returned by `scoped_gc_alloc` on
/// this thread.
#[no_mangle]
pub unsafe extern "C" fn scoped_gc_mark_return(obj: *mut ObjectHeader) -> bool {
    match ObjRef::from_raw(obj) {
        Some(obj) => mark_for_return(obj).is_ok(),
        None => false,
    }
}

/// Close the open scope. Aborts the thread (panics) on invalid nesting.
#[no_mangle]
pub extern "C" fn scoped_gc_exit() {
    exit();
}

/// Record an external reference to `obj`.
///
/// # Safety
///
/// `obj` must be null or a live object returned by `scoped_gc_alloc`.
#[no_mangle]
pub unsafe extern "C" fn scoped_gc_retain(obj: *mut ObjectHeader) {
    if let Some(obj) = ObjRef::from_raw(obj) {
        obj.retain();
    }
}

/// Drop an external reference to `obj`.
///
/// # Safety
///
/// `obj` must be null or a live object returned by `scoped_gc_alloc`.
#[no_mangle]
pub unsafe extern "C" fn scoped_gc_release(obj: *mut ObjectHeader) {
    if let Some(obj) = ObjRef::from_raw(obj) {
        obj.release();
    }
}

/// Offset of the payload from the object header.
#[no_mangle]
pub extern "C" fn scoped_gc_header_size() -> usize {
    HEADER_SIZE
}
