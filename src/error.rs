use std::alloc::Layout;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The allocator refused the control block. Carries the layout that was requested.
    #[error("failed to allocate a control block ({} bytes, align {})", .0.size(), .0.align())]
    Alloc(Layout),
}

// Returned by the fallible factory when the payload constructor itself reports a failure
#[derive(Debug, Error)]
pub enum MakeError<E> {
    #[error(transparent)]
    Block(#[from] Error),
    #[error("payload construction failed: {0}")]
    Payload(E),
}

impl<E> MakeError<E> {
    pub fn payload(self) -> Option<E> {
        match self {
            Self::Payload(e) => Some(e),
            Self::Block(_) => None
        }
    }
}
