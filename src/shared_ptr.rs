use allocator_api2::alloc::{ Allocator, Global };
use std::{
    alloc::handle_alloc_error,
    fmt::{ Debug, Display },
    hash::{ Hash, Hasher },
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::{ self, NonNull }
};
use crate::{
    control_block::{ ControlBlock, PtrBlock },
    deleter::{ DefaultDelete, Deleter },
    error::Error,
    weak_ptr::WeakPtr
};

/// Owning, reference counted handle in the manner of `std::shared_ptr`.
///
/// A handle is a cached payload address plus the control block that decides when the payload
/// and the block go away. The two may disagree: an aliased handle (see [`SharedPtr::aliasing`]
/// and [`SharedPtr::map`]) keeps one payload alive while pointing somewhere else. Equality and
/// hashing follow the address, not the block.
///
/// `T` may be unsized, so a `Box<dyn Trait>` can be adopted directly and [`SharedPtr::map`] can
/// view a payload through a trait object.
///
/// Counting is not atomic, so handles are neither `Send` nor `Sync`. The payload is handed out
/// by shared reference, or by [`SharedPtr::get_mut`] while this handle is its only observer.
pub struct SharedPtr<T: ?Sized> {
    pub(crate) _ptr: Option<NonNull<T>>,
    pub(crate) _rep: Option<NonNull<ControlBlock>>,
    // false for views built from a shared reference, which must never be written through
    pub(crate) _writable: bool,
    _data: PhantomData<T>
}

impl<T: ?Sized> SharedPtr<T> {
    /// An empty handle: no payload, no block, `use_count() == 0`.
    pub const fn null() -> Self {
        Self { _ptr: None, _rep: None, _writable: false, _data: PhantomData }
    }

    // takes a new strong reference on `rep`
    pub(crate) unsafe fn from_block(rep: NonNull<ControlBlock>, ptr: Option<NonNull<T>>, writable: bool) -> Self {
        let out = Self { _ptr: ptr, _rep: Some(rep), _writable: writable, _data: PhantomData };
        out.increment();
        out
    }

    /// Adopts a boxed value, releasing it through [`DefaultDelete`].
    pub fn from_box(value: Box<T>) -> Self {
        unsafe { Self::from_raw(Box::into_raw(value), DefaultDelete) }
    }

    /// Like [`SharedPtr::from_box`], reporting a failed block allocation instead of aborting.
    /// The box is freed in that case.
    pub fn try_from_box(value: Box<T>) -> Result<Self, Error> {
        unsafe { Self::try_from_raw_in(Box::into_raw(value), DefaultDelete, Global) }
    }

    /// Adopts `ptr`, which `deleter` releases once the last strong handle goes away.
    ///
    /// # Safety
    /// `ptr` must be null or valid for reads and writes of `T` until `deleter` runs, and it must
    /// be sound to call `deleter` on it exactly once.
    pub unsafe fn from_raw<D>(ptr: *mut T, deleter: D) -> Self
    where D: Deleter<T> + 'static
    {
        unsafe { Self::from_raw_in(ptr, deleter, Global) }
    }

    /// # Safety
    /// See [`SharedPtr::from_raw`].
    pub unsafe fn from_raw_in<D, A>(ptr: *mut T, deleter: D, alloc: A) -> Self
    where D: Deleter<T> + 'static,
          A: Allocator + 'static
    {
        match unsafe { Self::try_from_raw_in(ptr, deleter, alloc) } {
            Ok(out) => out,
            Err(Error::Alloc(layout)) => handle_alloc_error(layout)
        }
    }

    /// Adopts `ptr` with a control block from `alloc`. If the block can't be allocated, `deleter`
    /// is called on `ptr` before the error is returned, so the pointer never leaks.
    ///
    /// # Safety
    /// See [`SharedPtr::from_raw`].
    pub unsafe fn try_from_raw_in<D, A>(ptr: *mut T, deleter: D, alloc: A) -> Result<Self, Error>
    where D: Deleter<T> + 'static,
          A: Allocator + 'static
    {
        let rep = PtrBlock::new_in(ptr, deleter, alloc)?;
        Ok(unsafe { Self::from_block(rep, NonNull::new(ptr), true) })
    }

    /// Shares ownership with `owner` but points at `ptr`. If `owner` is empty the result owns
    /// nothing. The view is read-only: [`SharedPtr::get_mut`] never hands it out.
    ///
    /// # Safety
    /// `ptr` must be null or stay valid for reads for as long as `owner`'s payload is alive,
    /// usually by pointing into it.
    pub unsafe fn aliasing<O: ?Sized>(owner: &SharedPtr<O>, ptr: *mut T) -> Self {
        let out = Self { _ptr: NonNull::new(ptr), _rep: owner._rep, _writable: false, _data: PhantomData };
        out.increment();
        out
    }

    /// Safe aliasing: a handle to part of the payload (a field, an element) or to the payload
    /// seen as a trait object, keeping the whole payload alive.
    ///
    /// # Panics
    /// If this handle is empty, like dereferencing it.
    pub fn map<U, F>(&self, f: F) -> SharedPtr<U>
    where U: ?Sized,
          F: FnOnce(&T) -> &U
    {
        let target = NonNull::from(f(Deref::deref(self)));
        let out = SharedPtr { _ptr: Some(target), _rep: self._rep, _writable: false, _data: PhantomData };
        out.increment();
        out
    }

    pub fn get(&self) -> Option<&T> { self._ptr.map(|p| unsafe { &*p.as_ptr() }) }

    /// Mutable access, only while no other strong or weak handle can observe the payload.
    /// Views from [`SharedPtr::map`] and [`SharedPtr::aliasing`] never qualify.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        match (self._ptr, self._writable) {
            (Some(p), true) if self.use_count() == 1 && self.weak_count() == 1 => Some(unsafe { &mut *p.as_ptr() }),
            _ => None
        }
    }

    pub fn as_non_null(&self) -> Option<NonNull<T>> { self._ptr }
    pub fn is_null(&self) -> bool { self._ptr.is_none() }

    // thin address: equality ignores trait object metadata
    fn addr(&self) -> Option<NonNull<u8>> { self._ptr.map(|p| p.cast::<u8>()) }

    fn block(&self) -> Option<&ControlBlock> {
        self._rep.map(|rep| unsafe { &*rep.as_ptr() })
    }

    pub fn use_count(&self) -> usize { self.block().map_or(0, |b| b.strong_count()) }
    pub fn weak_count(&self) -> usize { self.block().map_or(0, |b| b.weak_count()) }
    pub fn unique(&self) -> bool { self.use_count() == 1 }

    /// True when both handles share a control block, whatever address they expose.
    pub fn owner_eq<U: ?Sized>(&self, other: &SharedPtr<U>) -> bool { self._rep == other._rep }

    pub fn downgrade(&self) -> WeakPtr<T> { WeakPtr::from(self) }

    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self._ptr, &mut other._ptr);
        mem::swap(&mut self._rep, &mut other._rep);
        mem::swap(&mut self._writable, &mut other._writable);
    }

    /// Moves ownership out, leaving this handle empty. Counts don't change.
    pub fn take(&mut self) -> Self {
        let mut out = Self::null();
        out.swap(self);
        out
    }

    pub fn reset(&mut self) {
        Self::null().swap(self);
    }

    /// Replaces the current ownership with `ptr`. The old payload is released (if this was its
    /// last owner) after the new block exists.
    ///
    /// # Safety
    /// See [`SharedPtr::from_raw`].
    pub unsafe fn reset_with<D>(&mut self, ptr: *mut T, deleter: D)
    where D: Deleter<T> + 'static
    {
        unsafe { Self::from_raw(ptr, deleter) }.swap(self);
    }

    /// Fallible [`SharedPtr::reset_with`]. On error this handle is left untouched and `deleter`
    /// has already released `ptr`.
    ///
    /// # Safety
    /// See [`SharedPtr::from_raw`].
    pub unsafe fn try_reset_with_in<D, A>(&mut self, ptr: *mut T, deleter: D, alloc: A) -> Result<(), Error>
    where D: Deleter<T> + 'static,
          A: Allocator + 'static
    {
        unsafe { Self::try_from_raw_in(ptr, deleter, alloc) }?.swap(self);
        Ok(())
    }

    fn increment(&self) {
        if let Some(rep) = self.block() {
            rep.inc_strong();
        }
    }
}

impl<T> SharedPtr<T> {
    // C++ get(): null for an empty handle
    pub fn as_ptr(&self) -> *mut T { self._ptr.map_or(ptr::null_mut(), NonNull::as_ptr) }
}

impl<T: ?Sized> Clone for SharedPtr<T> {
    fn clone(&self) -> Self {
        let out = Self { _ptr: self._ptr, _rep: self._rep, _writable: self._writable, _data: PhantomData };
        out.increment();
        out
    }

    // copy and swap: the old ownership is released by the temporary
    fn clone_from(&mut self, source: &Self) {
        source.clone().swap(self);
    }
}

impl<T: ?Sized> Drop for SharedPtr<T> {
    fn drop(&mut self) {
        if let Some(rep) = self._rep {
            unsafe { ControlBlock::dec_strong(rep) }
        }
    }
}

impl<T: ?Sized> Default for SharedPtr<T> {
    fn default() -> Self { Self::null() }
}

impl<T: ?Sized> Deref for SharedPtr<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        match self._ptr {
            Some(p) => unsafe { &*p.as_ptr() },
            None => panic!("Tried to dereference an empty SharedPtr")
        }
    }
}

impl<T: ?Sized> PartialEq for SharedPtr<T> {
    fn eq(&self, other: &Self) -> bool { self.addr() == other.addr() }
}

impl<T: ?Sized> Eq for SharedPtr<T> {}

impl<T: ?Sized> Hash for SharedPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) { self.addr().hash(state) }
}

impl<T> Debug for SharedPtr<T>
where T: Debug + ?Sized
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedPtr {{ data: {:?}, strong: {}, weak: {} }}",
            self.get(), self.use_count(), self.weak_count())
    }
}

impl<T> Display for SharedPtr<T>
where T: Display + ?Sized
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(v) => write!(f, "{}", v),
            None => write!(f, "nullptr")
        }
    }
}
