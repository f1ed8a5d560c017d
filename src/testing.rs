// Allocators for observing (or breaking) control block allocation in tests
use allocator_api2::alloc::{ AllocError, Allocator, Global };
use std::{
    alloc::Layout,
    cell::Cell,
    ptr::NonNull,
    rc::Rc
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Clones share their counters, so keep one around to inspect after handing the other to a block.
#[derive(Debug, Clone, Default)]
pub struct CountingAlloc {
    allocs: Rc<Cell<usize>>,
    frees: Rc<Cell<usize>>
}

impl CountingAlloc {
    pub fn new() -> Self { Self::default() }
    pub fn allocations(&self) -> usize { self.allocs.get() }
    pub fn deallocations(&self) -> usize { self.frees.get() }
    pub fn live(&self) -> usize { self.allocations() - self.deallocations() }
}

unsafe impl Allocator for CountingAlloc {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        let out = Global.allocate(layout)?;
        self.allocs.set(self.allocs.get() + 1);
        Ok(out)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.frees.set(self.frees.get() + 1);
        unsafe { Global.deallocate(ptr, layout) }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FailingAlloc;

unsafe impl Allocator for FailingAlloc {
    fn allocate(&self, _: Layout) -> Result<NonNull<[u8]>, AllocError> { Err(AllocError) }
    // nothing is ever handed out
    unsafe fn deallocate(&self, _: NonNull<u8>, _: Layout) {}
}
