//! Engine-wide error taxonomy.
//!
//! Every subsystem has its own error enum (allocators, jobs, frame graph), but
//! each one maps onto a small shared set of result kinds so callers can react
//! uniformly without matching on subsystem details.

use std::fmt;

/// Coarse classification shared by all engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A malformed call, e.g. submitting an empty job or passing a foreign pointer.
    InvalidArgs,
    /// Generic operation failure, e.g. a cyclic frame graph or a double free.
    Fail,
    /// A bounded arena has been exhausted.
    OutOfMemory,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgs => write!(f, "invalid arguments"),
            Self::Fail => write!(f, "operation failed"),
            Self::OutOfMemory => write!(f, "out of memory"),
        }
    }
}
