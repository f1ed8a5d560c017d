// std::make_shared: payload and control block in a single allocation
use allocator_api2::alloc::{ Allocator, Global };
use std::{
    alloc::handle_alloc_error,
    convert::Infallible
};
use crate::{
    control_block::ObjBlock,
    error::{ Error, MakeError },
    shared_ptr::SharedPtr
};

/// Construct `value` inside a fresh control block and return the only strong handle to it.
pub fn make_shared<T>(value: T) -> SharedPtr<T> { make_shared_in(value, Global) }

pub fn make_shared_in<T, A>(value: T, alloc: A) -> SharedPtr<T>
where A: Allocator + 'static
{
    match try_make_shared_in(value, alloc) {
        Ok(out) => out,
        Err(Error::Alloc(layout)) => handle_alloc_error(layout)
    }
}

pub fn try_make_shared_in<T, A>(value: T, alloc: A) -> Result<SharedPtr<T>, Error>
where A: Allocator + 'static
{
    try_make_shared_with_in(|| Ok::<_, Infallible>(value), alloc).map_err(|e| match e {
        MakeError::Block(e) => e,
        MakeError::Payload(never) => match never {}
    })
}

/// Allocates first, then runs `init` to produce the payload. Use this when building the value is
/// expensive or should only happen once the storage exists.
pub fn make_shared_with<T, F>(init: F) -> SharedPtr<T>
where F: FnOnce() -> T
{
    match try_make_shared_with_in(|| Ok::<_, Infallible>(init()), Global) {
        Ok(out) => out,
        Err(MakeError::Block(Error::Alloc(layout))) => handle_alloc_error(layout),
        Err(MakeError::Payload(never)) => match never {}
    }
}

pub fn try_make_shared_with<T, E, F>(init: F) -> Result<SharedPtr<T>, MakeError<E>>
where F: FnOnce() -> Result<T, E>
{
    try_make_shared_with_in(init, Global)
}

/// A failing (or panicking) `init` frees the storage again without anything being released: no
/// payload ever existed.
pub fn try_make_shared_with_in<T, E, F, A>(init: F, alloc: A) -> Result<SharedPtr<T>, MakeError<E>>
where F: FnOnce() -> Result<T, E>,
      A: Allocator + 'static
{
    let (rep, ptr) = ObjBlock::try_new_in(init, alloc)?;
    Ok(unsafe { SharedPtr::from_block(rep, Some(ptr), true) })
}

impl<T> SharedPtr<T> {
    /// Construct an object of type T and wrap it in a SharedPtr to act as a reference counting
    /// smart pointer.
    pub fn make_shared(data: T) -> Self { make_shared(data) }
    pub fn make_shared_in<A>(data: T, alloc: A) -> Self
    where A: Allocator + 'static
    {
        make_shared_in(data, alloc)
    }
}
