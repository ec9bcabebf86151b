//! Shared fixtures for the frame graph integration tests.
//!
//! [`CpuDevice`] stands in for a graphics backend: it owns the scratch
//! memory transient buffers are carved from and counts every resource hook
//! the graph calls.

#![allow(dead_code)]

use tde_core::memory::{GrowthPolicy, StackAllocator, create_stack_allocator};
use tde_graphics::{FrameGraphError, FrameGraphResource, ScratchMemory};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Backend
// ============================================================================

pub struct CpuDevice {
    pub memory: StackAllocator,
    pub reads: usize,
    pub writes: usize,
}

impl CpuDevice {
    pub fn new(scratch_size: usize) -> Self {
        Self {
            memory: create_stack_allocator(scratch_size, GrowthPolicy::Fixed).unwrap(),
            reads: 0,
            writes: 0,
        }
    }
}

impl ScratchMemory for CpuDevice {
    fn scratch_allocator(&mut self) -> &mut StackAllocator {
        &mut self.memory
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Host-visible results a frame hands back to the caller. Always imported.
#[derive(Debug, Default)]
pub struct Readback {
    pub values: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadbackDesc {
    pub slots: usize,
}

impl FrameGraphResource<CpuDevice> for Readback {
    type Desc = ReadbackDesc;

    fn acquire(&mut self, _: &mut CpuDevice, desc: &ReadbackDesc) -> Result<(), FrameGraphError> {
        self.values = vec![0; desc.slots];
        Ok(())
    }

    fn release(&mut self, _: &mut CpuDevice) -> Result<(), FrameGraphError> {
        self.values.clear();
        Ok(())
    }

    fn before_read(&mut self, device: &mut CpuDevice) {
        device.reads += 1;
    }

    fn before_write(&mut self, device: &mut CpuDevice) {
        device.writes += 1;
    }
}

/// Little-endian packing used to move `u32`s through scratch bytes.
pub fn pack(values: &[u32], bytes: &mut [u8]) {
    for (chunk, value) in bytes.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
}

pub fn unpack(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
