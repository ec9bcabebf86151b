//! Fixed-block memory arenas.
//!
//! Three allocators are provided, all sharing the [`Allocator`] trait:
//!
//! - [`LinearAllocator`] - bump allocation, freed all at once with [`Allocator::clear`]
//! - [`StackAllocator`] - LIFO allocation with individual frees
//! - [`PoolAllocator`] - fixed-size element slots with a free list
//!
//! Each allocator owns one or more pages of `page_size` bytes. With
//! [`GrowthPolicy::Fixed`] an allocator never requests more than its first
//! page and simply returns `None` once exhausted; with [`GrowthPolicy::Grow`]
//! it appends pages on demand.
//!
//! Allocators are `Send` but deliberately not shared: each is owned by a
//! single thread or job context (for example one scratch allocator per job
//! worker). Callers that need sharing must synchronise externally.
//!
//! # Example
//!
//! ```
//! use tde_core::memory::{Allocator, GrowthPolicy, create_linear_allocator};
//!
//! let mut arena = create_linear_allocator(1024, GrowthPolicy::Fixed).unwrap();
//! let ptr = arena.allocate(128, 16).unwrap();
//! assert_eq!(ptr.as_ptr() as usize % 16, 0);
//! assert!(arena.used_memory_size() >= 128);
//!
//! arena.clear().unwrap();
//! assert_eq!(arena.used_memory_size(), 0);
//! ```

mod linear;
mod page;
mod pool;
mod stack;

pub use linear::LinearAllocator;
pub use pool::PoolAllocator;
pub use stack::StackAllocator;

use std::ptr::NonNull;

use serde::Deserialize;
use thiserror::Error;

use crate::error::ErrorKind;

/// Errors reported by allocator operations.
///
/// Exhaustion is not an error variant of the allocation call itself:
/// [`Allocator::allocate`] returns `None` and the caller decides how to
/// react. [`AllocError::OutOfMemory`] exists for callers that want to
/// propagate that condition through `?`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The pointer was not handed out by this allocator.
    #[error("pointer {0:#x} does not belong to this allocator")]
    ForeignPointer(usize),
    /// The pointer was already returned to the allocator.
    #[error("pointer {0:#x} was already freed")]
    DoubleFree(usize),
    /// The allocator does not support the requested operation.
    #[error("{allocator} allocator does not support {operation}")]
    Unsupported {
        allocator: AllocatorKind,
        operation: &'static str,
    },
    /// The allocator could not satisfy a request of the given size.
    #[error("out of memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },
    /// The allocator was configured with unusable parameters.
    #[error("invalid allocator configuration: {0}")]
    InvalidConfig(String),
}

impl AllocError {
    /// Maps this error onto the engine-wide taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ForeignPointer(_) | Self::InvalidConfig(_) => ErrorKind::InvalidArgs,
            Self::DoubleFree(_) | Self::Unsupported { .. } => ErrorKind::Fail,
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
        }
    }
}

/// Identifies the allocation strategy behind an [`Allocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocatorKind {
    Linear,
    Stack,
    Pool,
}

impl std::fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linear => write!(f, "linear"),
            Self::Stack => write!(f, "stack"),
            Self::Pool => write!(f, "pool"),
        }
    }
}

/// What an allocator does once its current pages are exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthPolicy {
    /// Never allocate beyond the initial page.
    #[default]
    Fixed,
    /// Append a new page of the same size when the current ones are full.
    Grow,
}

/// Common interface of all arena allocators.
///
/// Pointers returned by [`allocate`](Allocator::allocate) stay valid until
/// they are deallocated, the allocator is cleared, or the allocator is dropped.
pub trait Allocator: Send {
    /// Reserves `size` bytes aligned to `align` (a power of two).
    ///
    /// Returns `None` when the request cannot be satisfied: zero size,
    /// an invalid alignment, a request larger than a page, or exhaustion.
    fn allocate(&mut self, size: usize, align: usize) -> Option<NonNull<u8>>;

    /// Returns a previously allocated block.
    fn deallocate(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError>;

    /// Releases every allocation at once while keeping the pages.
    fn clear(&mut self) -> Result<(), AllocError>;

    /// Total bytes owned by the allocator across all pages.
    fn total_memory_size(&self) -> usize;

    /// Bytes currently in use, including alignment padding and headers.
    fn used_memory_size(&self) -> usize;

    /// Number of live allocations.
    fn allocations_count(&self) -> usize;

    /// Safe view of `len` bytes starting at a live allocation.
    ///
    /// Returns `None` if `ptr` is not a live allocation of this allocator or
    /// the range runs past the end of its page.
    fn memory_mut(&mut self, ptr: NonNull<u8>, len: usize) -> Option<&mut [u8]>;

    fn kind(&self) -> AllocatorKind;
}

/// Declarative allocator description, typically loaded from TOML.
///
/// ```
/// use tde_core::memory::{AllocatorConfig, GrowthPolicy};
///
/// let config: AllocatorConfig = toml::from_str(r#"
///     kind = "pool"
///     element_size = 64
///     page_size = 4096
///     growth = "grow"
/// "#).unwrap();
///
/// assert!(matches!(config, AllocatorConfig::Pool { element_size: 64, growth: GrowthPolicy::Grow, .. }));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AllocatorConfig {
    Linear {
        page_size: usize,
        #[serde(default)]
        growth: GrowthPolicy,
    },
    Stack {
        page_size: usize,
        #[serde(default)]
        growth: GrowthPolicy,
    },
    Pool {
        element_size: usize,
        #[serde(default = "default_element_align")]
        element_align: usize,
        page_size: usize,
        #[serde(default)]
        growth: GrowthPolicy,
    },
}

fn default_element_align() -> usize {
    std::mem::align_of::<usize>()
}

/// Creates a bump allocator with pages of `page_size` bytes.
pub fn create_linear_allocator(
    page_size: usize,
    growth: GrowthPolicy,
) -> Result<LinearAllocator, AllocError> {
    validate_page_size(page_size)?;
    Ok(LinearAllocator::new(page_size, growth))
}

/// Creates a LIFO allocator with pages of `page_size` bytes.
pub fn create_stack_allocator(
    page_size: usize,
    growth: GrowthPolicy,
) -> Result<StackAllocator, AllocError> {
    validate_page_size(page_size)?;
    if page_size <= stack::HEADER_SIZE {
        return Err(AllocError::InvalidConfig(format!(
            "page size {page_size} cannot hold a stack header"
        )));
    }
    Ok(StackAllocator::new(page_size, growth))
}

/// Creates a pool of `element_size`-byte slots carved out of `page_size`-byte pages.
pub fn create_pool_allocator(
    element_size: usize,
    element_align: usize,
    page_size: usize,
    growth: GrowthPolicy,
) -> Result<PoolAllocator, AllocError> {
    validate_page_size(page_size)?;
    if element_size == 0 {
        return Err(AllocError::InvalidConfig("element size must be non-zero".into()));
    }
    if !element_align.is_power_of_two() {
        return Err(AllocError::InvalidConfig(format!(
            "element alignment {element_align} is not a power of two"
        )));
    }
    // The first slot may need up to `element_align - 1` bytes of padding.
    if element_size + element_align - 1 > page_size {
        return Err(AllocError::InvalidConfig(format!(
            "page size {page_size} cannot hold a single {element_size}-byte element"
        )));
    }
    Ok(PoolAllocator::new(element_size, element_align, page_size, growth))
}

/// Creates any allocator from its declarative description.
pub fn create_allocator(config: &AllocatorConfig) -> Result<Box<dyn Allocator>, AllocError> {
    Ok(match *config {
        AllocatorConfig::Linear { page_size, growth } => {
            Box::new(create_linear_allocator(page_size, growth)?)
        }
        AllocatorConfig::Stack { page_size, growth } => {
            Box::new(create_stack_allocator(page_size, growth)?)
        }
        AllocatorConfig::Pool {
            element_size,
            element_align,
            page_size,
            growth,
        } => Box::new(create_pool_allocator(
            element_size,
            element_align,
            page_size,
            growth,
        )?),
    })
}

fn validate_page_size(page_size: usize) -> Result<(), AllocError> {
    if page_size == 0 {
        return Err(AllocError::InvalidConfig("page size must be non-zero".into()));
    }
    Ok(())
}

/// Rounds `address` up to the next multiple of `align`.
pub fn aligned_address(address: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (address + align - 1) & !(align - 1)
}

/// Bytes needed to move `address` up to the next multiple of `align`.
pub fn padding(address: usize, align: usize) -> usize {
    aligned_address(address, align) - address
}

/// Like [`padding`], but also leaves at least `header_size` bytes in front
/// of the aligned address.
pub fn padding_with_header(address: usize, align: usize, header_size: usize) -> usize {
    let mut padding = padding(address, align);
    if padding < header_size {
        let missing = header_size - padding;
        padding += align * missing.div_ceil(align);
    }
    padding
}
