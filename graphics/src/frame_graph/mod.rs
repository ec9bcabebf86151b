//! Frame graph: declarative per-frame passes over virtual resources.
//!
//! A frame graph is built, compiled and executed once per frame:
//!
//! 1. **Building** - [`FrameGraph::add_pass`] runs each pass's setup callback,
//!    which declares the resources the pass creates, reads and writes through
//!    a [`FrameGraphBuilder`]. Already existing resources enter the graph
//!    through [`FrameGraph::import_resource`].
//! 2. **Compiled** - [`FrameGraph::compile`] culls passes whose outputs nobody
//!    consumes, orders the rest and computes resource lifetimes.
//! 3. **Executed** - [`FrameGraph::execute`] runs the surviving passes,
//!    acquiring every transient resource right before its first user and
//!    releasing it right after its last one.
//!
//! The graph is generic over the backend `B` handed to `execute`; resource
//! types decide what acquiring means for that backend by implementing
//! [`FrameGraphResource`].
//!
//! # Example
//!
//! ```
//! use tde_graphics::{FrameGraph, FrameGraphError, FrameGraphResource, ResourceHandle};
//!
//! #[derive(Default)]
//! struct Target {
//!     pixels: Vec<u32>,
//! }
//!
//! impl FrameGraphResource<()> for Target {
//!     type Desc = usize;
//!
//!     fn acquire(&mut self, _: &mut (), len: &usize) -> Result<(), FrameGraphError> {
//!         self.pixels = vec![0; *len];
//!         Ok(())
//!     }
//!
//!     fn release(&mut self, _: &mut ()) -> Result<(), FrameGraphError> {
//!         self.pixels = Vec::new();
//!         Ok(())
//!     }
//! }
//!
//! #[derive(Default, Clone)]
//! struct Present {
//!     screen: ResourceHandle,
//! }
//!
//! let mut graph = FrameGraph::new();
//! let screen = graph.import_resource("screen", 4, Target { pixels: vec![0; 4] }).unwrap();
//!
//! graph
//!     .add_pass(
//!         "clear",
//!         |builder, data: &mut Present| data.screen = builder.write(screen),
//!         |data, ctx| {
//!             ctx.resource::<Target>(data.screen)?.pixels.fill(0xff00ff);
//!             Ok(())
//!         },
//!     )
//!     .unwrap();
//!
//! graph.compile().unwrap();
//! graph.execute(&mut ()).unwrap();
//! assert_eq!(graph.get_resource::<Target>(screen).unwrap().pixels, vec![0xff00ff; 4]);
//! ```

mod builder;
mod compiler;
mod dump;
mod pass;
mod resource;
mod scratch;

use std::fmt;
use std::io::Write;

use tde_core::{frame_mark, profile_function, profile_scope_dynamic};

use crate::error::FrameGraphError;

use compiler::CompiledPlan;
use pass::{ExecuteFn, PassRecord};
use resource::{ResourceEntry, ResourceRegistry};

pub use builder::FrameGraphBuilder;
pub use pass::PassContext;
pub use resource::{FrameGraphResource, ResourceHandle, ResourceLifetime};
pub use scratch::{ScratchBuffer, ScratchBufferDesc, ScratchMemory};

/// Lifecycle of a frame graph. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameGraphState {
    Building,
    Compiled,
    Executed,
}

impl fmt::Display for FrameGraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Building => write!(f, "building"),
            Self::Compiled => write!(f, "compiled"),
            Self::Executed => write!(f, "executed"),
        }
    }
}

/// One frame's worth of passes and the resources flowing between them.
///
/// `'a` bounds whatever the execute callbacks borrow, so passes can refer to
/// frame-local state without cloning it. `B` is the backend context passed
/// to [`execute`](Self::execute).
pub struct FrameGraph<'a, B = ()> {
    state: FrameGraphState,
    passes: Vec<PassRecord>,
    executes: Vec<Option<ExecuteFn<'a, B>>>,
    resources: ResourceRegistry<B>,
    plan: CompiledPlan,
}

impl<'a, B> FrameGraph<'a, B> {
    pub fn new() -> Self {
        Self {
            state: FrameGraphState::Building,
            passes: Vec::new(),
            executes: Vec::new(),
            resources: ResourceRegistry::new(),
            plan: CompiledPlan::default(),
        }
    }

    pub fn state(&self) -> FrameGraphState {
        self.state
    }

    /// Adds a pass and returns its data as filled in by `setup`.
    ///
    /// `setup` runs immediately with `D::default()` and declares resource
    /// usage through the builder, storing the handles it gets back in the
    /// pass data. `execute` later receives that same data. The returned copy
    /// lets following passes consume this pass's outputs.
    ///
    /// If `setup` misuses the builder, the error is returned and the graph
    /// is left exactly as it was before the call.
    pub fn add_pass<D, S, E>(
        &mut self,
        name: impl Into<String>,
        setup: S,
        execute: E,
    ) -> Result<D, FrameGraphError>
    where
        D: Default + Clone + 'a,
        S: FnOnce(&mut FrameGraphBuilder<'_, B>, &mut D),
        E: FnOnce(&D, &mut PassContext<'_, B>) -> Result<(), FrameGraphError> + 'a,
    {
        self.expect_state(FrameGraphState::Building)?;

        let name = name.into();
        if self.passes.iter().any(|pass| pass.name == name) {
            return Err(FrameGraphError::DuplicatePass(name));
        }

        let index = self.passes.len();
        let mut record = PassRecord::new(name);
        let mut data = D::default();
        let mut builder = FrameGraphBuilder::new(&mut self.resources, &mut record, index);
        setup(&mut builder, &mut data);
        builder.finish()?;

        let bound = data.clone();
        let run: ExecuteFn<'a, B> =
            Box::new(move |ctx: &mut PassContext<'_, B>| execute(&bound, ctx));
        self.passes.push(record);
        self.executes.push(Some(run));
        Ok(data)
    }

    /// Registers a resource owned outside the graph.
    ///
    /// Imported resources are never acquired or released, and a pass writing
    /// one is never culled since the result is consumed outside the graph.
    pub fn import_resource<T: FrameGraphResource<B>>(
        &mut self,
        name: impl Into<String>,
        desc: T::Desc,
        resource: T,
    ) -> Result<ResourceHandle, FrameGraphError> {
        self.expect_state(FrameGraphState::Building)?;
        let entry = ResourceEntry::new(name.into(), desc, resource, true);
        Ok(self.resources.insert(entry, None))
    }

    /// Culls unused passes, orders the rest and computes resource lifetimes.
    ///
    /// A cycle fails with [`FrameGraphError::CyclicDependency`] and leaves the
    /// graph in the building state.
    pub fn compile(&mut self) -> Result<(), FrameGraphError> {
        profile_function!();
        self.expect_state(FrameGraphState::Building)?;

        let plan = compiler::compile(&mut self.passes, &mut self.resources)?;
        log::info!(
            "frame graph compiled: {} of {} passes, {} resources",
            plan.order.len(),
            self.passes.len(),
            self.resources.entries.len(),
        );
        self.plan = plan;
        self.state = FrameGraphState::Compiled;
        Ok(())
    }

    /// Runs the compiled passes in order.
    ///
    /// The first error from a resource hook or pass callback aborts the
    /// frame; transient resources acquired so far are released before the
    /// error is returned. The graph is executed either way.
    pub fn execute(&mut self, backend: &mut B) -> Result<(), FrameGraphError> {
        profile_function!();
        self.expect_state(FrameGraphState::Compiled)?;
        self.state = FrameGraphState::Executed;

        let plan = std::mem::take(&mut self.plan);
        let result = self.run(&plan, backend);
        self.plan = plan;

        if let Err(err) = &result {
            log::warn!("frame graph execution aborted: {err}");
            self.release_acquired(backend);
        }
        frame_mark!();
        result
    }

    fn run(&mut self, plan: &CompiledPlan, backend: &mut B) -> Result<(), FrameGraphError> {
        for (step, &pass) in plan.order.iter().enumerate() {
            for &entry in &plan.acquire_at[step] {
                let entry = &mut self.resources.entries[entry];
                entry.resource.acquire(backend)?;
                entry.acquired = true;
            }

            let record = &self.passes[pass];
            for &read in &record.reads {
                self.resources.entry_mut(read)?.resource.before_read(backend);
            }
            for &write in &record.writes {
                self.resources.entry_mut(write)?.resource.before_write(backend);
            }

            if let Some(execute) = self.executes[pass].take() {
                profile_scope_dynamic!(record.name.as_str());
                let mut ctx = PassContext {
                    backend: &mut *backend,
                    resources: &mut self.resources,
                    pass_name: &record.name,
                };
                execute(&mut ctx)?;
            }

            for &entry in &plan.release_at[step] {
                let entry = &mut self.resources.entries[entry];
                entry.acquired = false;
                entry.resource.release(backend)?;
            }
        }
        Ok(())
    }

    fn release_acquired(&mut self, backend: &mut B) {
        for entry in self.resources.entries.iter_mut().filter(|entry| entry.acquired) {
            entry.acquired = false;
            if let Err(err) = entry.resource.release(backend) {
                log::warn!("failed to release frame graph resource '{}': {err}", entry.name);
            }
        }
    }

    /// Writes the compiled graph in Graphviz DOT format.
    pub fn dump<W: Write>(&self, out: &mut W) -> Result<(), FrameGraphError> {
        if self.state == FrameGraphState::Building {
            return Err(FrameGraphError::InvalidState {
                expected: FrameGraphState::Compiled,
                actual: self.state,
            });
        }
        dump::write_dot(out, &self.passes, &self.resources)?;
        Ok(())
    }

    pub fn get_resource<T: FrameGraphResource<B>>(
        &self,
        handle: ResourceHandle,
    ) -> Result<&T, FrameGraphError> {
        self.resources.resource(handle)
    }

    pub fn get_resource_mut<T: FrameGraphResource<B>>(
        &mut self,
        handle: ResourceHandle,
    ) -> Result<&mut T, FrameGraphError> {
        self.resources.resource_mut(handle)
    }

    pub fn get_resource_desc<T: FrameGraphResource<B>>(
        &self,
        handle: ResourceHandle,
    ) -> Result<&T::Desc, FrameGraphError> {
        self.resources.desc::<T>(handle)
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Number of distinct resources, not counting their versions.
    pub fn resource_count(&self) -> usize {
        self.resources.entries.len()
    }

    /// Names of the surviving passes in execution order. Empty before compiling.
    pub fn execution_order(&self) -> Vec<&str> {
        self.plan
            .order
            .iter()
            .map(|&pass| self.passes[pass].name.as_str())
            .collect()
    }

    pub fn is_pass_culled(&self, name: &str) -> Result<bool, FrameGraphError> {
        self.passes
            .iter()
            .find(|pass| pass.name == name)
            .map(|pass| pass.culled)
            .ok_or_else(|| FrameGraphError::UnknownPass(name.to_owned()))
    }

    /// Lifetime of the resource behind `handle`, or `None` before compiling
    /// and for resources no surviving pass uses.
    pub fn resource_lifetime(&self, handle: ResourceHandle) -> Option<ResourceLifetime> {
        self.resources.entry(handle).ok()?.lifetime
    }

    fn expect_state(&self, expected: FrameGraphState) -> Result<(), FrameGraphError> {
        if self.state != expected {
            return Err(FrameGraphError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }
}

impl<B> Default for FrameGraph<'_, B> {
    fn default() -> Self {
        Self::new()
    }
}
