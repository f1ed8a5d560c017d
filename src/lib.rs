mod control_block;
pub mod deleter;
pub mod error;
pub mod make_shared;
pub mod shared_ptr;
pub mod weak_ptr;

#[cfg(test)]
pub(crate) mod testing;

pub use deleter::{ DefaultDelete, Deleter, NoopDelete };
pub use error::{ Error, MakeError };
pub use make_shared::{
    make_shared,
    make_shared_in,
    make_shared_with,
    try_make_shared_in,
    try_make_shared_with,
    try_make_shared_with_in
};
pub use shared_ptr::SharedPtr;
pub use weak_ptr::WeakPtr;
