// Release routines for pointers adopted by SharedPtr. Any FnOnce(*mut T) works, so custom
// allocators, logging or "don't free, we don't own it" policies are just closures.
use std::mem::ManuallyDrop;

pub trait Deleter<T: ?Sized> {
    fn delete(self, ptr: *mut T);
}

impl<T, F> Deleter<T> for F
where T: ?Sized,
      F: FnOnce(*mut T)
{
    fn delete(self, ptr: *mut T) { self(ptr) }
}

// std::default_delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    /// `ptr` must come from `Box::into_raw` (or be null, which is ignored like `delete nullptr`).
    fn delete(self, ptr: *mut T) {
        if !ptr.is_null() {
            drop(unsafe { Box::from_raw(ptr) });
        }
    }
}

// For storage owned by someone else: the control block only tracks lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoopDelete;

impl<T: ?Sized> Deleter<T> for NoopDelete {
    fn delete(self, _: *mut T) {}
}

// Owns an adopted pointer until a control block takes over. Dropping the guard on any exit path
// (early return, unwinding) hands the pointer to its deleter.
pub(crate) struct DeleteGuard<T, D>
where T: ?Sized,
      D: Deleter<T>
{
    ptr: *mut T,
    deleter: ManuallyDrop<D>
}

impl<T, D> DeleteGuard<T, D>
where T: ?Sized,
      D: Deleter<T>
{
    pub(crate) fn new(ptr: *mut T, deleter: D) -> Self {
        Self { ptr, deleter: ManuallyDrop::new(deleter) }
    }

    pub(crate) fn disarm(self) -> D {
        let mut this = ManuallyDrop::new(self);
        unsafe { ManuallyDrop::take(&mut this.deleter) }
    }
}

impl<T, D> Drop for DeleteGuard<T, D>
where T: ?Sized,
      D: Deleter<T>
{
    fn drop(&mut self) {
        let deleter = unsafe { ManuallyDrop::take(&mut self.deleter) };
        deleter.delete(self.ptr);
    }
}
