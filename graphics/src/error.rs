//! Frame graph error types.

use tde_core::ErrorKind;
use tde_core::memory::AllocError;
use thiserror::Error;

use crate::frame_graph::{FrameGraphState, ResourceHandle};

/// Errors that can occur while building, compiling or executing a frame graph.
#[derive(Debug, Error)]
pub enum FrameGraphError {
    /// An operation was called out of the `Building -> Compiled -> Executed` order.
    #[error("frame graph is {actual}, expected {expected}")]
    InvalidState {
        expected: FrameGraphState,
        actual: FrameGraphState,
    },
    /// The handle does not name a resource of this graph.
    #[error("unknown resource handle {0}")]
    InvalidHandle(ResourceHandle),
    /// A write targeted a version that was already superseded by another write.
    #[error("handle {handle} of resource '{name}' is stale, a newer version exists")]
    StaleHandle { name: String, handle: ResourceHandle },
    /// A resource was accessed as the wrong type.
    #[error("resource '{name}' is a {actual}, not a {requested}")]
    TypeMismatch {
        name: String,
        requested: &'static str,
        actual: &'static str,
    },
    /// Two passes were registered under the same name.
    #[error("a pass named '{0}' already exists")]
    DuplicatePass(String),
    /// No pass with this name exists.
    #[error("unknown pass '{0}'")]
    UnknownPass(String),
    /// The surviving passes cannot be ordered.
    #[error("cyclic dependency between passes: {}", passes.join(", "))]
    CyclicDependency { passes: Vec<String> },
    /// A resource could not get its backing memory.
    #[error("out of memory acquiring {requested} bytes")]
    OutOfMemory { requested: usize },
    /// A pass callback or resource hook gave up.
    #[error("pass '{pass}' failed: {message}")]
    PassFailed { pass: String, message: String },
    #[error(transparent)]
    Allocation(#[from] AllocError),
    #[error("failed to write frame graph dump: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameGraphError {
    /// Maps this error onto the engine-wide taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidState { .. }
            | Self::InvalidHandle(_)
            | Self::StaleHandle { .. }
            | Self::TypeMismatch { .. }
            | Self::DuplicatePass(_)
            | Self::UnknownPass(_) => ErrorKind::InvalidArgs,
            Self::CyclicDependency { .. } | Self::PassFailed { .. } | Self::Io(_) => {
                ErrorKind::Fail
            }
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Self::Allocation(err) => err.kind(),
        }
    }
}
