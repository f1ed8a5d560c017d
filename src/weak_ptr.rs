use std::{
    fmt::Debug,
    marker::PhantomData,
    mem,
    ptr::NonNull
};
use crate::{
    control_block::ControlBlock,
    shared_ptr::SharedPtr
};

// std::weak_ptr
// Holds a weak reference on the control block only. The cached address goes stale once the payload
// is released and is never dereferenced here; lock() is the only way back to the payload.
pub struct WeakPtr<T: ?Sized> {
    _ptr: Option<NonNull<T>>,
    _rep: Option<NonNull<ControlBlock>>,
    _writable: bool,
    _data: PhantomData<T>
}

impl<T: ?Sized> WeakPtr<T> {
    pub const fn new() -> Self {
        Self { _ptr: None, _rep: None, _writable: false, _data: PhantomData }
    }

    fn block(&self) -> Option<&ControlBlock> {
        self._rep.map(|rep| unsafe { &*rep.as_ptr() })
    }

    /// Upgrades to a strong handle if the payload is still alive, otherwise returns an empty one.
    pub fn lock(&self) -> SharedPtr<T> {
        match self._rep {
            Some(rep) if unsafe { rep.as_ref() }.strong_count() > 0 => unsafe {
                SharedPtr::from_block(rep, self._ptr, self._writable)
            },
            _ => SharedPtr::null()
        }
    }

    pub fn use_count(&self) -> usize { self.block().map_or(0, |b| b.strong_count()) }
    pub fn weak_count(&self) -> usize { self.block().map_or(0, |b| b.weak_count()) }
    pub fn expired(&self) -> bool { self.use_count() == 0 }

    pub fn owner_eq<U: ?Sized>(&self, other: &SharedPtr<U>) -> bool { self._rep == other._rep }

    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self._ptr, &mut other._ptr);
        mem::swap(&mut self._rep, &mut other._rep);
        mem::swap(&mut self._writable, &mut other._writable);
    }

    pub fn take(&mut self) -> Self {
        let mut out = Self::new();
        out.swap(self);
        out
    }

    // weak_ptr& operator=(const shared_ptr&)
    pub fn assign(&mut self, other: &SharedPtr<T>) {
        WeakPtr::from(other).swap(self);
    }

    pub fn reset(&mut self) {
        Self::new().swap(self);
    }

    fn increment(&self) {
        if let Some(rep) = self.block() {
            rep.inc_weak();
        }
    }
}

impl<T: ?Sized> From<&SharedPtr<T>> for WeakPtr<T> {
    fn from(value: &SharedPtr<T>) -> Self {
        let out = Self { _ptr: value._ptr, _rep: value._rep, _writable: value._writable, _data: PhantomData };
        out.increment();
        out
    }
}

impl<T: ?Sized> Clone for WeakPtr<T> {
    fn clone(&self) -> Self {
        let out = Self { _ptr: self._ptr, _rep: self._rep, _writable: self._writable, _data: PhantomData };
        out.increment();
        out
    }

    fn clone_from(&mut self, source: &Self) {
        source.clone().swap(self);
    }
}

impl<T: ?Sized> Drop for WeakPtr<T> {
    fn drop(&mut self) {
        if let Some(rep) = self._rep {
            unsafe { ControlBlock::dec_weak(rep) }
        }
    }
}

impl<T: ?Sized> Default for WeakPtr<T> {
    fn default() -> Self { Self::new() }
}

impl<T: ?Sized> Debug for WeakPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WeakPtr {{ strong: {}, weak: {} }}", self.use_count(), self.weak_count())
    }
}

#[cfg(test)]
pub mod tests {
    use super::WeakPtr;
    use crate::{
        make_shared::{ make_shared, make_shared_in },
        shared_ptr::SharedPtr,
        testing::{ init_logger, CountingAlloc }
    };
    use std::{
        cell::{ Cell, RefCell },
        fmt::Display,
        error::Error,
        rc::Rc
    };
    type TestReturn = Result<(), Box<dyn Error>>;

    fn check_strong_count(get: usize, expect: usize) {
        assert!(get == expect, "Strong count should be {} instead of {}", expect, get);
    }
    fn check_weak_count(get: usize, expect: usize) {
        assert!(get == expect, "Weak count should be {} instead of {}", expect, get);
    }

    #[test]
    fn lock_after_reset_is_empty() -> TestReturn {
        let mut shared = make_shared(200);
        let weak = WeakPtr::from(&shared);
        assert!(*weak.lock() == 200, "Locking a live payload should read 200");
        shared.reset();
        let locked = weak.lock();
        assert!(locked.is_null() && locked.use_count() == 0, "Lock after reset should be empty");
        assert!(weak.expired(), "Weak pointer should report the payload as expired");
        Ok(())
    }

    #[test]
    fn release_and_free_are_separate_events() -> TestReturn {
        init_logger();
        let alloc = CountingAlloc::new();
        let released = Rc::new(Cell::new(0));
        struct Payload(Rc<Cell<usize>>);
        impl Drop for Payload {
            fn drop(&mut self) { self.0.set(self.0.get() + 1) }
        }

        let a = make_shared_in(Payload(released.clone()), alloc.clone());
        let b = a.clone();
        check_strong_count(a.use_count(), 2);
        check_weak_count(a.weak_count(), 2);
        let w = a.downgrade();
        check_weak_count(w.weak_count(), 3);
        drop(a);
        check_strong_count(w.use_count(), 1);
        check_weak_count(w.weak_count(), 2);
        assert!(released.get() == 0, "Payload must stay alive while b exists");
        drop(b);
        assert!(released.get() == 1, "Payload should be released with the last strong handle");
        check_strong_count(w.use_count(), 0);
        check_weak_count(w.weak_count(), 1);
        assert!(w.lock().is_null(), "Lock after the payload is released should be empty");
        assert!(alloc.live() == 1, "Block must outlive the payload while w exists");
        drop(w);
        assert!(alloc.live() == 0, "Block should be freed with the last weak handle");
        assert!(released.get() == 1, "Payload must be released exactly once");
        Ok(())
    }

    #[test]
    fn lock_takes_a_strong_reference() -> TestReturn {
        let shared = make_shared(String::from("Enemy0"));
        let weak = shared.downgrade();
        {
            let locked = weak.lock();
            check_strong_count(shared.use_count(), 2);
            check_weak_count(shared.weak_count(), 3);
            assert!(locked == shared, "Locked handle should expose the same address");
        }
        check_strong_count(shared.use_count(), 1);
        check_weak_count(shared.weak_count(), 2);
        Ok(())
    }

    #[test]
    fn copy_move_assign() -> TestReturn {
        let first = make_shared(1);
        let second = make_shared(2);
        let mut weak = first.downgrade();
        let copy = weak.clone();
        check_weak_count(first.weak_count(), 3);
        weak.assign(&second);
        check_weak_count(first.weak_count(), 2);
        check_weak_count(second.weak_count(), 2);
        assert!(*weak.lock() == 2, "Assigned weak pointer should observe the second payload");
        let mut other = WeakPtr::new();
        other.clone_from(&copy);
        check_weak_count(first.weak_count(), 3);
        let moved = other.take();
        assert!(other.use_count() == 0 && other.weak_count() == 0, "Moved-from weak pointer should be empty");
        check_weak_count(first.weak_count(), 3);
        let mut swapped = weak.clone();
        let mut target = moved;
        swapped.swap(&mut target);
        assert!(*swapped.lock() == 1 && *target.lock() == 2, "Swap should exchange observed payloads");
        target.reset();
        check_weak_count(second.weak_count(), 2);
        Ok(())
    }

    #[test]
    fn aliased_weak_pointer_keeps_alias_address() -> TestReturn {
        let owner = make_shared((5u8, 6u16));
        let alias = owner.map(|t| &t.1);
        let weak = alias.downgrade();
        assert!(weak.owner_eq(&owner), "Weak alias should observe the owner's block");
        assert!(*weak.lock() == 6, "Locking an alias should return the alias address");
        drop(alias);
        drop(owner);
        assert!(weak.lock().is_null(), "Lock should fail once every owner is gone");
        Ok(())
    }

    #[test]
    fn empty_weak_pointer() -> TestReturn {
        let weak: WeakPtr<i32> = WeakPtr::default();
        assert!(weak.expired() && weak.lock().is_null(), "Empty weak pointer should never lock");
        assert!(format!("{:?}", weak) == "WeakPtr { strong: 0, weak: 0 }", "Unexpected debug output");
        let empty: SharedPtr<i32> = SharedPtr::null();
        let from_empty = empty.downgrade();
        check_weak_count(from_empty.weak_count(), 0);
        Ok(())
    }

    #[test]
    fn self_assign_keeps_counts() -> TestReturn {
        let shared = make_shared(String::from("Chest"));
        let mut weak = shared.downgrade();
        let same = weak.clone();
        check_weak_count(shared.weak_count(), 3);
        weak.clone_from(&same);
        check_weak_count(shared.weak_count(), 3);
        weak.assign(&shared);
        check_weak_count(shared.weak_count(), 3);
        check_strong_count(shared.use_count(), 1);
        assert!(weak.lock() == shared, "Self-assigned weak pointer should still observe the payload");
        drop(same);
        check_weak_count(shared.weak_count(), 2);
        Ok(())
    }

    #[test]
    fn payload_holding_a_weak_pointer_to_itself() -> TestReturn {
        let alloc = CountingAlloc::new();
        let drops = Rc::new(Cell::new(0));
        struct Node {
            this: RefCell<WeakPtr<Node>>,
            drops: Rc<Cell<usize>>
        }
        impl Drop for Node {
            fn drop(&mut self) { self.drops.set(self.drops.get() + 1) }
        }
        let node = make_shared_in(Node { this: RefCell::new(WeakPtr::new()), drops: drops.clone() }, alloc.clone());
        node.this.borrow_mut().assign(&node);
        check_weak_count(node.weak_count(), 2);
        assert!(node.this.borrow().lock() == node, "Payload should reach itself through its weak pointer");
        drop(node);
        assert!(drops.get() == 1, "Payload should be released exactly once");
        assert!(alloc.live() == 0, "Dropping the inner weak pointer should free the block");
        Ok(())
    }

    #[test]
    fn weak_pointer_to_trait_object() -> TestReturn {
        let shared: SharedPtr<dyn Display> = SharedPtr::from_box(Box::new(12) as Box<dyn Display>);
        let weak = shared.downgrade();
        assert!(weak.lock().to_string() == "12", "Locked trait object should display its payload");
        drop(shared);
        assert!(weak.expired() && weak.lock().is_null(), "Weak trait object should expire with its owner");
        Ok(())
    }
}
