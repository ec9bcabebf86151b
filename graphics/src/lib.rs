//! # TDE Graphics
//!
//! Backend-agnostic frame graph for the TDE engine.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`FrameGraph`] - per-frame graph of passes over versioned virtual resources
//! - [`FrameGraphBuilder`] - declares what a pass creates, reads and writes
//! - [`FrameGraphResource`] - trait a backend implements per resource type
//! - [`ScratchBuffer`] - CPU scratch memory carved from a stack allocator
//!
//! Passes whose outputs nobody consumes are culled, the rest run in
//! dependency order, and transient resources only exist between their first
//! and last user.
//!
//! ## Example
//!
//! ```ignore
//! use tde_graphics::FrameGraph;
//!
//! let mut graph = FrameGraph::new();
//! let backbuffer = graph.import_resource("backbuffer", desc, swapchain_image)?;
//! let gbuffer = graph.add_pass("gbuffer", setup_gbuffer, draw_gbuffer)?;
//! graph.add_pass("lighting", |builder, data: &mut Lighting| {
//!     data.albedo = builder.read(gbuffer.albedo);
//!     data.output = builder.write(backbuffer);
//! }, shade)?;
//! graph.compile()?;
//! graph.execute(&mut device)?;
//! ```

pub mod error;
pub mod frame_graph;

// Re-export main types for convenience
pub use error::FrameGraphError;
pub use frame_graph::{
    FrameGraph, FrameGraphBuilder, FrameGraphResource, FrameGraphState, PassContext,
    ResourceHandle, ResourceLifetime, ScratchBuffer, ScratchBufferDesc, ScratchMemory,
};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
