use allocator_api2::alloc::Allocator;
use log::{ debug, trace, warn };
use std::{
    alloc::Layout,
    cell::Cell,
    mem::{ self, ManuallyDrop, MaybeUninit },
    process,
    ptr::{ self, NonNull }
};
use crate::{
    deleter::{ Deleter, DeleteGuard },
    error::{ Error, MakeError }
};

// See https://github.com/microsoft/STL/blob/main/stl/inc/memory (_Ref_count_base and friends)

// The virtual half of the control block. Both entries receive the block header and cast it back to
// the concrete block type they were generated for.
pub(crate) struct BlockVtable {
    // destroy the payload, runs once when the strong count reaches zero
    unlink: unsafe fn(NonNull<ControlBlock>),
    // free the block itself, runs once when the weak count reaches zero
    delete_this: unsafe fn(NonNull<ControlBlock>)
}

/// Shared bookkeeping for every [`SharedPtr`](crate::SharedPtr) and [`WeakPtr`](crate::WeakPtr)
/// referring to the same payload.
///
/// Every strong reference also holds one weak reference, so `weak > 0` whenever `strong > 0` and
/// the block outlives the payload. The counters are plain [`Cell`]s: a block must never be touched
/// from more than one thread.
#[repr(C)]
pub(crate) struct ControlBlock {
    vtable: &'static BlockVtable,
    strong: Cell<usize>,
    weak: Cell<usize>
}

impl ControlBlock {
    // blocks start out unowned, the first SharedPtr takes them to 1/1
    fn new(vtable: &'static BlockVtable) -> Self {
        Self { vtable, strong: Cell::new(0), weak: Cell::new(0) }
    }

    pub fn strong_count(&self) -> usize { self.strong.get() }
    pub fn weak_count(&self) -> usize { self.weak.get() }

    // Overflow would wrap a count back to zero and free a live payload. Like Rc, abort instead of
    // panicking: unwinding could leave the count pinned while callers keep leaking handles.
    fn bump(count: &Cell<usize>) {
        count.set(count.get().checked_add(1).unwrap_or_else(|| process::abort()));
    }

    pub fn inc_weak(&self) {
        Self::bump(&self.weak);
    }

    pub fn inc_strong(&self) {
        Self::bump(&self.strong);
        self.inc_weak();
    }

    /// Drops one weak reference, freeing the block when it was the last one.
    ///
    /// # Safety
    /// `this` must point to a live block on which the caller owns a weak reference. The block may
    /// be gone when this returns.
    pub unsafe fn dec_weak(this: NonNull<Self>) {
        let (weak, delete_this) = {
            let block = unsafe { this.as_ref() };
            let weak = block.weak.get() - 1;
            block.weak.set(weak);
            (weak, block.vtable.delete_this)
        };
        if weak == 0 {
            trace!("freeing control block {:p}", this);
            unsafe { delete_this(this) }
        }
    }

    /// Drops one strong reference, releasing the payload when it was the last one, then drops
    /// the weak reference that came with it.
    ///
    /// # Safety
    /// `this` must point to a live block on which the caller owns a strong reference.
    pub unsafe fn dec_strong(this: NonNull<Self>) {
        let (strong, unlink) = {
            let block = unsafe { this.as_ref() };
            let strong = block.strong.get() - 1;
            block.strong.set(strong);
            (strong, block.vtable.unlink)
        };
        if strong == 0 {
            trace!("releasing payload of control block {:p}", this);
            unsafe { unlink(this) }
        }
        unsafe { Self::dec_weak(this) }
    }
}

// Frees raw block storage unless forgotten. Covers a payload constructor that fails or panics
// before the block is complete.
struct StorageGuard<'a, A>
where A: Allocator
{
    storage: NonNull<u8>,
    layout: Layout,
    alloc: &'a A
}

impl<'a, A> Drop for StorageGuard<'a, A>
where A: Allocator
{
    fn drop(&mut self) {
        trace!("payload construction failed, freeing storage {:p}", self.storage);
        unsafe { self.alloc.deallocate(self.storage, self.layout) }
    }
}

// Control block for a pointer that was allocated somewhere else, released through its deleter.
#[repr(C)]
pub(crate) struct PtrBlock<T, D, A>
where T: ?Sized,
      D: Deleter<T>,
      A: Allocator
{
    header: ControlBlock,
    ptr: *mut T,
    deleter: ManuallyDrop<D>,
    alloc: A
}

impl<T, D, A> PtrBlock<T, D, A>
where T: ?Sized,
      D: Deleter<T> + 'static,
      A: Allocator + 'static
{
    const VTABLE: &'static BlockVtable = &BlockVtable {
        unlink: Self::unlink,
        delete_this: Self::delete_this
    };

    // On failure the deleter has already run on `ptr`.
    pub(crate) fn new_in(ptr: *mut T, deleter: D, alloc: A) -> Result<NonNull<ControlBlock>, Error> {
        let guard = DeleteGuard::new(ptr, deleter);
        let layout = Layout::new::<Self>();
        let storage = match alloc.allocate(layout) {
            Ok(storage) => storage.cast::<Self>(),
            Err(_) => {
                warn!("could not allocate a control block for {:p}, releasing it", ptr);
                return Err(Error::Alloc(layout));
            }
        };
        unsafe {
            storage.as_ptr().write(Self {
                header: ControlBlock::new(Self::VTABLE),
                ptr,
                deleter: ManuallyDrop::new(guard.disarm()),
                alloc
            });
        }
        debug!("created control block {:p} owning {:p}", storage, ptr);
        Ok(storage.cast())
    }

    unsafe fn unlink(this: NonNull<ControlBlock>) {
        let block = this.cast::<Self>().as_ptr();
        let (ptr, deleter) = unsafe { ((*block).ptr, ManuallyDrop::take(&mut (*block).deleter)) };
        deleter.delete(ptr);
    }

    // the deleter is gone by now: unlink always runs first
    unsafe fn delete_this(this: NonNull<ControlBlock>) {
        let block = this.cast::<Self>();
        unsafe {
            let alloc = ptr::read(&raw const (*block.as_ptr()).alloc);
            alloc.deallocate(block.cast(), Layout::new::<Self>());
        }
    }
}

// Control block with the payload stored inline, the layout make_shared produces.
#[repr(C)]
pub(crate) struct ObjBlock<T, A>
where A: Allocator
{
    header: ControlBlock,
    alloc: A,
    data: MaybeUninit<T>
}

impl<T, A> ObjBlock<T, A>
where A: Allocator + 'static
{
    const VTABLE: &'static BlockVtable = &BlockVtable {
        unlink: Self::unlink,
        delete_this: Self::delete_this
    };

    // Allocates the block and builds the payload inside it. Returns the block and the payload
    // address. If `init` fails (or unwinds) the storage is freed and nothing is dropped.
    pub(crate) fn try_new_in<E, F>(init: F, alloc: A) -> Result<(NonNull<ControlBlock>, NonNull<T>), MakeError<E>>
    where F: FnOnce() -> Result<T, E>
    {
        let layout = Layout::new::<Self>();
        let storage = alloc.allocate(layout).map_err(|_| Error::Alloc(layout))?.cast::<Self>();
        let guard = StorageGuard { storage: storage.cast(), layout, alloc: &alloc };
        let data = unsafe { NonNull::new_unchecked((&raw mut (*storage.as_ptr()).data).cast::<T>()) };
        match init() {
            Ok(value) => unsafe { data.as_ptr().write(value) },
            Err(e) => return Err(MakeError::Payload(e))
        }
        mem::forget(guard);
        unsafe {
            (&raw mut (*storage.as_ptr()).header).write(ControlBlock::new(Self::VTABLE));
            (&raw mut (*storage.as_ptr()).alloc).write(alloc);
        }
        debug!("created control block {:p} with inline payload", storage);
        Ok((storage.cast(), data))
    }

    unsafe fn unlink(this: NonNull<ControlBlock>) {
        let block = this.cast::<Self>().as_ptr();
        unsafe { ptr::drop_in_place((&raw mut (*block).data).cast::<T>()) }
    }

    unsafe fn delete_this(this: NonNull<ControlBlock>) {
        let block = this.cast::<Self>();
        unsafe {
            let alloc = ptr::read(&raw const (*block.as_ptr()).alloc);
            alloc.deallocate(block.cast(), Layout::new::<Self>());
        }
    }
}
