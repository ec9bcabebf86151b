//! CPU scratch memory as a frame graph resource.

use std::ptr::NonNull;

use tde_core::memory::{Allocator, StackAllocator};

use crate::error::FrameGraphError;

use super::resource::FrameGraphResource;

/// Backends that own the stack allocator scratch buffers are carved from.
pub trait ScratchMemory {
    fn scratch_allocator(&mut self) -> &mut StackAllocator;
}

impl ScratchMemory for StackAllocator {
    fn scratch_allocator(&mut self) -> &mut StackAllocator {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchBufferDesc {
    pub size: usize,
    pub align: usize,
}

impl ScratchBufferDesc {
    pub fn new(size: usize) -> Self {
        Self { size, align: 16 }
    }

    pub fn with_align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }
}

/// Transient bytes living only between their first and last user.
///
/// Acquiring pushes a block onto the backend's [`StackAllocator`] and
/// releasing pops it, so buffers with disjoint lifetimes reuse the same
/// memory frame after frame.
///
/// ```
/// use tde_core::memory::{Allocator, GrowthPolicy, StackAllocator, create_stack_allocator};
/// use tde_graphics::{FrameGraph, ResourceHandle, ScratchBuffer, ScratchBufferDesc};
///
/// #[derive(Default, Clone)]
/// struct Upload {
///     staging: ResourceHandle,
/// }
///
/// let mut memory = create_stack_allocator(4096, GrowthPolicy::Fixed).unwrap();
/// let mut graph: FrameGraph<'_, StackAllocator> = FrameGraph::new();
/// graph
///     .add_pass(
///         "upload",
///         |builder, data: &mut Upload| {
///             data.staging = builder.create::<ScratchBuffer>("staging", ScratchBufferDesc::new(256));
///             builder.mark_as_persistent();
///         },
///         |data, ctx| {
///             let (staging, memory) = ctx.resource_with_backend::<ScratchBuffer>(data.staging)?;
///             if let Some(bytes) = staging.bytes_mut(memory) {
///                 bytes.fill(0xAB);
///             }
///             Ok(())
///         },
///     )
///     .unwrap();
///
/// graph.compile().unwrap();
/// graph.execute(&mut memory).unwrap();
/// assert_eq!(memory.used_memory_size(), 0);
/// ```
#[derive(Debug, Default)]
pub struct ScratchBuffer {
    block: Option<NonNull<u8>>,
    len: usize,
}

impl ScratchBuffer {
    pub fn is_acquired(&self) -> bool {
        self.block.is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of the backing block, if acquired.
    pub fn address(&self) -> Option<usize> {
        self.block.map(|block| block.as_ptr() as usize)
    }

    /// The buffer's bytes, borrowed through the allocator that owns them.
    pub fn bytes_mut<'m, M: ScratchMemory + ?Sized>(&self, memory: &'m mut M) -> Option<&'m mut [u8]> {
        let block = self.block?;
        memory.scratch_allocator().memory_mut(block, self.len)
    }
}

impl<B: ScratchMemory> FrameGraphResource<B> for ScratchBuffer {
    type Desc = ScratchBufferDesc;

    fn acquire(&mut self, backend: &mut B, desc: &ScratchBufferDesc) -> Result<(), FrameGraphError> {
        let block = backend
            .scratch_allocator()
            .allocate(desc.size, desc.align)
            .ok_or(FrameGraphError::OutOfMemory {
                requested: desc.size,
            })?;
        self.block = Some(block);
        self.len = desc.size;
        Ok(())
    }

    fn release(&mut self, backend: &mut B) -> Result<(), FrameGraphError> {
        self.len = 0;
        if let Some(block) = self.block.take() {
            backend.scratch_allocator().deallocate(block)?;
        }
        Ok(())
    }
}
