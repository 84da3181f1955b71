//! Error taxonomy mirroring the POSIX codes the runtime's primitives map onto.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;

/// All fallible conditions the runtime can report.
///
/// Discriminants are not load-bearing ABI, but the variant set mirrors the
/// POSIX errno values the design is built against (EINVAL, ENOMEM, EBUSY,
/// EDEADLK, EPERM, ETIMEDOUT, EAGAIN, ESRCH).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("out of memory")]
    OutOfMemory,
    #[error("resource busy")]
    Busy,
    #[error("operation would deadlock")]
    WouldDeadlock,
    #[error("operation not permitted")]
    NotPermitted,
    #[error("operation timed out")]
    TimedOut,
    #[error("operation would block")]
    WouldBlock,
    #[error("no such thread")]
    NoSuchThread,
}
