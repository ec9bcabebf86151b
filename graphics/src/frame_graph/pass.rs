//! Passes and the context handed to their execute callbacks.

use crate::error::FrameGraphError;

use super::resource::{FrameGraphResource, ResourceHandle, ResourceRegistry};

/// Execute callback of a pass with its pass data already bound.
pub(crate) type ExecuteFn<'a, B> =
    Box<dyn FnOnce(&mut PassContext<'_, B>) -> Result<(), FrameGraphError> + 'a>;

/// Resource usage declared by a pass during setup.
#[derive(Debug, Clone, Default)]
pub(crate) struct PassRecord {
    pub(crate) name: String,
    pub(crate) persistent: bool,
    pub(crate) creates: Vec<ResourceHandle>,
    pub(crate) reads: Vec<ResourceHandle>,
    pub(crate) writes: Vec<ResourceHandle>,
    /// Produced versions still needed by someone; set during compilation.
    pub(crate) refcount: u32,
    pub(crate) culled: bool,
}

impl PassRecord {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    /// Versions this pass produces: its creations plus the new versions it wrote.
    pub(crate) fn produced(&self) -> impl Iterator<Item = ResourceHandle> + '_ {
        self.creates.iter().copied().chain(
            self.writes
                .iter()
                .copied()
                .filter(|handle| !self.creates.contains(handle)),
        )
    }

    /// Every handle the pass touches, each at most once.
    pub(crate) fn used(&self) -> impl Iterator<Item = ResourceHandle> + '_ {
        self.produced().chain(self.reads.iter().copied())
    }

    pub(crate) fn produces(&self, handle: ResourceHandle) -> bool {
        self.creates.contains(&handle) || self.writes.contains(&handle)
    }
}

/// Access to the backend and the graph's resources from inside a pass.
///
/// ```ignore
/// graph.add_pass("blur", setup, |data: &BlurData, ctx| {
///     let (target, device) = ctx.resource_with_backend::<Texture>(data.output)?;
///     device.dispatch_blur(target);
///     Ok(())
/// })?;
/// ```
pub struct PassContext<'p, B> {
    pub(crate) backend: &'p mut B,
    pub(crate) resources: &'p mut ResourceRegistry<B>,
    pub(crate) pass_name: &'p str,
}

impl<B> PassContext<'_, B> {
    pub fn pass_name(&self) -> &str {
        self.pass_name
    }

    pub fn backend(&mut self) -> &mut B {
        &mut *self.backend
    }

    pub fn resource<T: FrameGraphResource<B>>(
        &mut self,
        handle: ResourceHandle,
    ) -> Result<&mut T, FrameGraphError> {
        self.resources.resource_mut(handle)
    }

    pub fn desc<T: FrameGraphResource<B>>(
        &self,
        handle: ResourceHandle,
    ) -> Result<&T::Desc, FrameGraphError> {
        self.resources.desc::<T>(handle)
    }

    /// Borrows a resource and the backend at the same time, for resources
    /// whose contents live in backend-owned memory.
    pub fn resource_with_backend<T: FrameGraphResource<B>>(
        &mut self,
        handle: ResourceHandle,
    ) -> Result<(&mut T, &mut B), FrameGraphError> {
        let resource = self.resources.resource_mut(handle)?;
        Ok((resource, &mut *self.backend))
    }

    /// Builds a [`FrameGraphError::PassFailed`] for this pass.
    pub fn fail(&self, message: impl Into<String>) -> FrameGraphError {
        FrameGraphError::PassFailed {
            pass: self.pass_name.to_owned(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_produced_skips_writes_of_own_creations() {
        let mut record = PassRecord::new("gbuffer".into());
        record.creates = vec![ResourceHandle::new(0), ResourceHandle::new(1)];
        record.writes = vec![ResourceHandle::new(1), ResourceHandle::new(4)];
        record.reads = vec![ResourceHandle::new(3)];

        let produced: Vec<_> = record.produced().map(ResourceHandle::index).collect();
        assert_eq!(produced, vec![0, 1, 4]);
        let used: Vec<_> = record.used().map(ResourceHandle::index).collect();
        assert_eq!(used, vec![0, 1, 4, 3]);
        assert!(record.produces(ResourceHandle::new(4)));
        assert!(!record.produces(ResourceHandle::new(3)));
    }
}
