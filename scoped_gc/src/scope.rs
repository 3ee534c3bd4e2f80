//! Scope-branded handles.
//!
//! [`Scope`] and [`Local`] put the scope protocol under the borrow checker.
//! A scope body is a closure that receives `&mut Scope<'s>` for a fresh
//! lifetime `'s`; every handle it allocates is a `Local<'s>`. Because the
//! closure must work for *any* `'s`, a `Local<'s>` cannot be stored outside
//! the closure or returned from it. The one way out is
//! [`Scope::scope_returning`], which promotes the returned handle into the
//! enclosing scope.
//!
//! ```ignore
//! let mut ctx = ScopeContext::with_defaults();
//! ctx.scope(|outer| {
//!     let list = outer.scope_returning(|inner| {
//!         let scratch = inner.alloc(128)?; // released at inner exit
//!         let mut out = inner.alloc(16)?;
//!         out.bytes_mut().copy_from_slice(&scratch.bytes()[..16]);
//!         Ok(out)
//!     })?;
//!     assert_eq!(list.depth(), outer.depth());
//!     Ok::<_, ScopeError>(())
//! })
//! ```

use crate::alloc::ObjRef;
use crate::context::ScopeContext;
use crate::{Depth, ScopeError};
use std::marker::PhantomData;

/// An open scope.
///
/// Created by [`ScopeContext::scope`] or [`Scope::scope`]; the scope is
/// exited when the body returns.
pub struct Scope<'s> {
    ctx: &'s mut ScopeContext,
}

/// A handle to an object owned by the scope branded `'s`.
///
/// Handles are not `Clone`: at most one handle gives mutable payload access.
pub struct Local<'s> {
    obj: ObjRef,
    _scope: PhantomData<&'s ()>,
}

impl ScopeContext {
    /// Run `body` in a new nested scope.
    ///
    /// Every object allocated through the scope is collected when `body`
    /// returns.
    ///
    /// # Panics
    ///
    /// Panics if the exit violates the floating-object policy.
    pub fn scope<R, F>(&mut self, body: F) -> R
    where
        F: for<'s> FnOnce(&mut Scope<'s>) -> R,
    {
        self.enter();
        let result = body(&mut Scope { ctx: &mut *self });
        self.exit();
        result
    }
}

impl<'s> Scope<'s> {
    /// Allocate a zeroed object of `size` bytes owned by this scope.
    pub fn alloc(&mut self, size: usize) -> Result<Local<'s>, ScopeError> {
        let obj = self.ctx.allocate(size)?;
        Ok(Local {
            obj,
            _scope: PhantomData,
        })
    }

    /// Run `body` in a nested scope. Nothing outlives it.
    pub fn scope<R, F>(&mut self, body: F) -> R
    where
        F: for<'n> FnOnce(&mut Scope<'n>) -> R,
    {
        self.ctx.scope(body)
    }

    /// Run `body` in a nested scope and promote the handle it returns.
    ///
    /// On `Ok`, the returned object moves into this scope and comes back as a
    /// `Local<'s>`. On `Err`, the nested scope is collected in full and the
    /// error is passed through.
    pub fn scope_returning<F>(&mut self, body: F) -> Result<Local<'s>, ScopeError>
    where
        F: for<'n> FnOnce(&mut Scope<'n>) -> Result<Local<'n>, ScopeError>,
    {
        self.ctx.enter();
        // The handle borrows the nested `Scope`; keep only the raw reference.
        let returned = body(&mut Scope { ctx: &mut *self.ctx }).map(|local| local.obj);

        let returned = returned.and_then(|obj| {
            // SAFETY: an object of the nested scope is live until its exit.
            unsafe { self.ctx.mark_for_return(obj) }.map(|()| obj)
        });
        self.ctx.exit();

        returned.map(|obj| Local {
            obj,
            _scope: PhantomData,
        })
    }

    /// Depth of this scope.
    pub fn depth(&self) -> Depth {
        self.ctx.depth()
    }

    /// The underlying context, for inspection.
    pub fn context(&self) -> &ScopeContext {
        &*self.ctx
    }
}

impl<'s> Local<'s> {
    /// The raw object reference.
    pub fn raw(&self) -> ObjRef {
        self.obj
    }

    /// Owning depth.
    pub fn depth(&self) -> Depth {
        // SAFETY: the object lives as long as its scope brand.
        unsafe { self.obj.depth() }.unwrap_or(0)
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        // SAFETY: the object lives as long as its scope brand.
        unsafe { self.obj.size() }
    }

    /// Outstanding external references.
    pub fn ref_count(&self) -> u32 {
        // SAFETY: the object lives as long as its scope brand.
        unsafe { self.obj.ref_count() }
    }

    /// Record an external reference. A referenced object is floating if its
    /// scope exits before the matching [`release`](Self::release).
    pub fn retain(&self) {
        // SAFETY: the object lives as long as its scope brand.
        unsafe { self.obj.retain() }
    }

    /// Drop an external reference.
    pub fn release(&self) {
        // SAFETY: the object lives as long as its scope brand.
        unsafe { self.obj.release() }
    }

    /// Payload bytes.
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: live, and `&self` excludes the mutable view.
        unsafe { self.obj.payload() }
    }

    /// Mutable payload bytes.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: live, and `&mut self` is the only handle to this object.
        unsafe { self.obj.payload_mut() }
    }
}

impl std::fmt::Debug for Local<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Local")
            .field("obj", &self.obj)
            .field("depth", &self.depth())
            .field("size", &self.size())
            .finish()
    }
}
