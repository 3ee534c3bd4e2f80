//! Scope-managed object storage.
//!
//! Every object is a single system allocation: an [`ObjectHeader`] followed
//! by the payload. [`ObjRef`] is the raw reference the ledger records and
//! generated code passes around.

use crate::{Depth, ScopeError, ScopeTag};
use std::alloc::Layout;
use std::cell::Cell;
use std::ptr::NonNull;

/// Alignment of every object (header and payload).
pub(crate) const OBJECT_ALIGN: usize = 8;

/// Header stored in front of every managed payload.
#[repr(C)]
#[derive(Debug)]
pub struct ObjectHeader {
    /// Owning scope, or pending promotion.
    tag: Cell<ScopeTag>,
    /// References held from outside the ledger.
    ref_count: Cell<u32>,
    /// Payload size in bytes.
    size: usize,
}

/// Header size rounded up so the payload starts aligned.
pub(crate) const HEADER_SIZE: usize = align_up(std::mem::size_of::<ObjectHeader>(), OBJECT_ALIGN);

/// A reference to a scope-managed object.
///
/// `ObjRef` is a plain pointer. It does not keep the object alive; the
/// object is released when its scope exits with a zero reference count.
/// Code that needs compile-time lifetime checking should use
/// [`Local`](crate::Local) handles instead.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef {
    ptr: NonNull<ObjectHeader>,
}

impl ObjRef {
    /// Create an `ObjRef` from a raw header pointer.
    ///
    /// # Safety
    ///
    /// The pointer must come from [`ObjRef::as_ptr`] on a live object.
    pub unsafe fn from_raw(ptr: *mut ObjectHeader) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr })
    }

    /// Get the raw header pointer.
    #[inline]
    pub fn as_ptr(self) -> *mut ObjectHeader {
        self.ptr.as_ptr()
    }

    /// Get the header.
    ///
    /// # Safety
    ///
    /// The object must not have been released.
    #[inline]
    pub unsafe fn header<'a>(self) -> &'a ObjectHeader {
        self.ptr.as_ref()
    }

    /// Current scope tag.
    ///
    /// # Safety
    ///
    /// The object must not have been released.
    #[inline]
    pub unsafe fn tag(self) -> ScopeTag {
        self.header().tag()
    }

    /// Owning depth, `None` while pending promotion.
    ///
    /// # Safety
    ///
    /// The object must not have been released.
    #[inline]
    pub unsafe fn depth(self) -> Option<Depth> {
        self.header().tag().depth()
    }

    /// Outstanding external references.
    ///
    /// # Safety
    ///
    /// The object must not have been released.
    #[inline]
    pub unsafe fn ref_count(self) -> u32 {
        self.header().ref_count()
    }

    /// Record a new external reference.
    ///
    /// # Safety
    ///
    /// The object must not have been released.
    #[inline]
    pub unsafe fn retain(self) {
        self.header().retain();
    }

    /// Drop an external reference.
    ///
    /// # Safety
    ///
    /// The object must not have been released.
    #[inline]
    pub unsafe fn release(self) {
        self.header().release();
    }

    /// Payload size in bytes.
    ///
    /// # Safety
    ///
    /// The object must not have been released.
    #[inline]
    pub unsafe fn size(self) -> usize {
        self.header().size
    }

    /// Pointer to the first payload byte.
    #[inline]
    pub fn payload_ptr(self) -> *mut u8 {
        // SAFETY: every object is allocated with room for the header.
        unsafe { (self.ptr.as_ptr() as *mut u8).add(HEADER_SIZE) }
    }

    /// Payload bytes.
    ///
    /// # Safety
    ///
    /// The object must not have been released, and no mutable view of the
    /// payload may exist.
    #[inline]
    pub unsafe fn payload<'a>(self) -> &'a [u8] {
        std::slice::from_raw_parts(self.payload_ptr(), self.size())
    }

    /// Mutable payload bytes.
    ///
    /// # Safety
    ///
    /// The object must not have been released, and no other view of the
    /// payload may exist.
    #[inline]
    pub unsafe fn payload_mut<'a>(self) -> &'a mut [u8] {
        std::slice::from_raw_parts_mut(self.payload_ptr(), self.size())
    }
}

impl std::fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjRef({:p})", self.ptr)
    }
}

impl ObjectHeader {
    /// Current scope tag.
    #[inline]
    pub fn tag(&self) -> ScopeTag {
        self.tag.get()
    }

    #[inline]
    pub(crate) fn set_tag(&self, tag: ScopeTag) {
        self.tag.set(tag);
    }

    /// Outstanding external references.
    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.ref_count.get()
    }

    /// Record a new external reference.
    #[inline]
    pub fn retain(&self) {
        self.ref_count.set(self.ref_count.get().saturating_add(1));
    }

    /// Drop an external reference. Saturates at zero.
    #[inline]
    pub fn release(&self) {
        self.ref_count.set(self.ref_count.get().saturating_sub(1));
    }

    /// Payload size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Layout of an object with `size` payload bytes.
fn object_layout(size: usize) -> Result<Layout, ScopeError> {
    let total = HEADER_SIZE
        .checked_add(size)
        .ok_or(ScopeError::InvalidSize { size })?;
    Layout::from_size_align(total, OBJECT_ALIGN).map_err(|_| ScopeError::InvalidSize { size })
}

/// Allocate a zeroed object owned by the scope at `depth`.
pub(crate) fn allocate_object(size: usize, depth: Depth) -> Result<ObjRef, ScopeError> {
    let layout = object_layout(size)?;

    // SAFETY: the layout is never zero-sized because it includes the header.
    let raw = unsafe { std::alloc::alloc_zeroed(layout) } as *mut ObjectHeader;
    let ptr = NonNull::new(raw).ok_or(ScopeError::OutOfMemory { size })?;

    // SAFETY: freshly allocated, properly aligned for the header.
    unsafe {
        ptr.as_ptr().write(ObjectHeader {
            tag: Cell::new(ScopeTag::Owned(depth)),
            ref_count: Cell::new(0),
            size,
        });
    }

    Ok(ObjRef { ptr })
}

/// Return an object's storage to the system allocator.
///
/// # Safety
///
/// `obj` must have been produced by `allocate_object` and not yet released.
pub(crate) unsafe fn release_object(obj: ObjRef) {
    let size = obj.size();
    if let Ok(layout) = object_layout(size) {
        std::alloc::dealloc(obj.as_ptr() as *mut u8, layout);
    }
}

/// Align a size up to the given alignment.
#[inline]
pub(crate) const fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 8), 16);
    }

    #[test]
    fn test_allocate_initializes_header() {
        let obj = allocate_object(24, 3).unwrap();
        unsafe {
            assert_eq!(obj.tag(), ScopeTag::Owned(3));
            assert_eq!(obj.ref_count(), 0);
            assert_eq!(obj.size(), 24);
            assert!(obj.payload().iter().all(|b| *b == 0));
            release_object(obj);
        }
    }

    #[test]
    fn test_payload_is_aligned() {
        let obj = allocate_object(1, 1).unwrap();
        assert_eq!(obj.payload_ptr() as usize % OBJECT_ALIGN, 0);
        unsafe { release_object(obj) };
    }

    #[test]
    fn test_ref_count_saturates() {
        let obj = allocate_object(0, 1).unwrap();
        unsafe {
            obj.release();
            assert_eq!(obj.ref_count(), 0);
            obj.retain();
            obj.retain();
            obj.release();
            assert_eq!(obj.ref_count(), 1);
            release_object(obj);
        }
    }

    #[test]
    fn test_oversized_request_is_rejected() {
        assert_eq!(
            allocate_object(usize::MAX, 1),
            Err(ScopeError::InvalidSize { size: usize::MAX })
        );
    }

    #[test]
    fn test_raw_round_trip() {
        let obj = allocate_object(4, 1).unwrap();
        let back = unsafe { ObjRef::from_raw(obj.as_ptr()) };
        assert_eq!(back, Some(obj));
        assert_eq!(unsafe { ObjRef::from_raw(std::ptr::null_mut()) }, None);
        unsafe { release_object(obj) };
    }
}
