//! Resource handles, the backend-facing resource trait and the type-erased
//! resource table.

use std::any::{Any, type_name};
use std::fmt;

use crate::error::FrameGraphError;

/// Handle to one version of a frame graph resource.
///
/// Every write produces a new handle; the previous one keeps naming the old
/// version and can still be read, but no longer written. Handles are only
/// meaningful within the graph that created them.
///
/// The default handle is invalid, so pass data structs can derive `Default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle(u32);

impl ResourceHandle {
    pub const INVALID: Self = Self(u32::MAX);

    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl Default for ResourceHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.0)
        } else {
            write!(f, "#invalid")
        }
    }
}

/// A resource the frame graph can materialize on demand.
///
/// `B` is the backend context handed to [`FrameGraph::execute`](super::FrameGraph::execute);
/// the graph itself knows nothing about GPUs or memory and only calls these
/// hooks at the right points of the frame:
///
/// - [`acquire`](Self::acquire) right before the first pass using the resource
/// - [`release`](Self::release) right after the last one
/// - [`before_read`](Self::before_read) / [`before_write`](Self::before_write)
///   before every pass that reads or writes it
///
/// Imported resources are owned outside the graph and never acquired or released.
///
/// ```
/// use tde_graphics::{FrameGraphError, FrameGraphResource};
///
/// #[derive(Default)]
/// struct Texture {
///     id: Option<u32>,
/// }
///
/// struct TextureDesc {
///     width: u32,
///     height: u32,
/// }
///
/// struct Device {
///     next_id: u32,
/// }
///
/// impl FrameGraphResource<Device> for Texture {
///     type Desc = TextureDesc;
///
///     fn acquire(&mut self, device: &mut Device, _desc: &TextureDesc) -> Result<(), FrameGraphError> {
///         self.id = Some(device.next_id);
///         device.next_id += 1;
///         Ok(())
///     }
///
///     fn release(&mut self, _device: &mut Device) -> Result<(), FrameGraphError> {
///         self.id = None;
///         Ok(())
///     }
/// }
/// ```
pub trait FrameGraphResource<B>: Sized + 'static {
    type Desc: 'static;

    fn acquire(&mut self, backend: &mut B, desc: &Self::Desc) -> Result<(), FrameGraphError>;

    fn release(&mut self, backend: &mut B) -> Result<(), FrameGraphError>;

    fn before_read(&mut self, _backend: &mut B) {}

    fn before_write(&mut self, _backend: &mut B) {}
}

/// A resource together with its descriptor.
pub(crate) struct Slot<T: 'static, D: 'static> {
    pub(crate) resource: T,
    pub(crate) desc: D,
}

/// Object-safe view of a [`Slot`] so resources of different types can share one table.
pub(crate) trait ErasedResource<B> {
    fn acquire(&mut self, backend: &mut B) -> Result<(), FrameGraphError>;
    fn release(&mut self, backend: &mut B) -> Result<(), FrameGraphError>;
    fn before_read(&mut self, backend: &mut B);
    fn before_write(&mut self, backend: &mut B);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<B, T: FrameGraphResource<B>> ErasedResource<B> for Slot<T, T::Desc> {
    fn acquire(&mut self, backend: &mut B) -> Result<(), FrameGraphError> {
        self.resource.acquire(backend, &self.desc)
    }

    fn release(&mut self, backend: &mut B) -> Result<(), FrameGraphError> {
        self.resource.release(backend)
    }

    fn before_read(&mut self, backend: &mut B) {
        self.resource.before_read(backend);
    }

    fn before_write(&mut self, backend: &mut B) {
        self.resource.before_write(backend);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }
}

/// Position of a resource's first and last user in the execution order.
///
/// Both values index into [`FrameGraph::execution_order`](super::FrameGraph::execution_order).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLifetime {
    pub first_user: usize,
    pub last_user: usize,
}

impl ResourceLifetime {
    pub(crate) fn extend(lifetime: &mut Option<Self>, step: usize) {
        match lifetime {
            Some(lifetime) => {
                lifetime.first_user = lifetime.first_user.min(step);
                lifetime.last_user = lifetime.last_user.max(step);
            }
            None => {
                *lifetime = Some(Self {
                    first_user: step,
                    last_user: step,
                })
            }
        }
    }

    /// Whether two lifetimes share a pass, i.e. their resources cannot alias.
    pub fn overlaps(&self, other: &ResourceLifetime) -> bool {
        self.first_user <= other.last_user && other.first_user <= self.last_user
    }
}

/// One underlying resource, shared by all of its versions.
pub(crate) struct ResourceEntry<B> {
    pub(crate) name: String,
    pub(crate) resource: Box<dyn ErasedResource<B>>,
    pub(crate) imported: bool,
    /// Latest version; only a node of this version may be written.
    pub(crate) version: u32,
    pub(crate) acquired: bool,
    pub(crate) lifetime: Option<ResourceLifetime>,
}

impl<B> ResourceEntry<B> {
    pub(crate) fn new<T: FrameGraphResource<B>>(
        name: String,
        desc: T::Desc,
        resource: T,
        imported: bool,
    ) -> Self {
        Self {
            name,
            resource: Box::new(Slot { resource, desc }),
            imported,
            version: 1,
            acquired: false,
            lifetime: None,
        }
    }

    fn slot<T: FrameGraphResource<B>>(&self) -> Result<&Slot<T, T::Desc>, FrameGraphError> {
        let actual = self.resource.type_name();
        self.resource
            .as_any()
            .downcast_ref()
            .ok_or_else(|| self.type_mismatch::<T>(actual))
    }

    fn slot_mut<T: FrameGraphResource<B>>(
        &mut self,
    ) -> Result<&mut Slot<T, T::Desc>, FrameGraphError> {
        let actual = self.resource.type_name();
        let name = &self.name;
        self.resource
            .as_any_mut()
            .downcast_mut()
            .ok_or_else(|| FrameGraphError::TypeMismatch {
                name: name.clone(),
                requested: type_name::<T>(),
                actual,
            })
    }

    fn type_mismatch<T>(&self, actual: &'static str) -> FrameGraphError {
        FrameGraphError::TypeMismatch {
            name: self.name.clone(),
            requested: type_name::<T>(),
            actual,
        }
    }
}

/// One version of a resource.
#[derive(Debug, Clone)]
pub(crate) struct ResourceNode {
    pub(crate) entry: usize,
    pub(crate) version: u32,
    /// Pass that created or wrote this version.
    pub(crate) producer: Option<usize>,
    /// Version this one was written over.
    pub(crate) previous: Option<ResourceHandle>,
    /// Passes reading this version that survived culling.
    pub(crate) refcount: u32,
}

/// The resource table shared by the graph, its builder and pass contexts.
pub(crate) struct ResourceRegistry<B> {
    pub(crate) entries: Vec<ResourceEntry<B>>,
    pub(crate) nodes: Vec<ResourceNode>,
}

impl<B> ResourceRegistry<B> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Adds a new resource and returns the handle of its first version.
    pub(crate) fn insert(&mut self, entry: ResourceEntry<B>, producer: Option<usize>) -> ResourceHandle {
        self.entries.push(entry);
        self.push_node(self.entries.len() - 1, 1, producer, None)
    }

    pub(crate) fn push_node(
        &mut self,
        entry: usize,
        version: u32,
        producer: Option<usize>,
        previous: Option<ResourceHandle>,
    ) -> ResourceHandle {
        self.nodes.push(ResourceNode {
            entry,
            version,
            producer,
            previous,
            refcount: 0,
        });
        ResourceHandle::new(self.nodes.len() - 1)
    }

    pub(crate) fn node(&self, handle: ResourceHandle) -> Result<&ResourceNode, FrameGraphError> {
        self.nodes
            .get(handle.index())
            .ok_or(FrameGraphError::InvalidHandle(handle))
    }

    pub(crate) fn entry(&self, handle: ResourceHandle) -> Result<&ResourceEntry<B>, FrameGraphError> {
        let node = self.node(handle)?;
        Ok(&self.entries[node.entry])
    }

    pub(crate) fn entry_mut(
        &mut self,
        handle: ResourceHandle,
    ) -> Result<&mut ResourceEntry<B>, FrameGraphError> {
        let entry = self.node(handle)?.entry;
        Ok(&mut self.entries[entry])
    }

    pub(crate) fn is_imported(&self, node: &ResourceNode) -> bool {
        self.entries[node.entry].imported
    }

    pub(crate) fn resource<T: FrameGraphResource<B>>(
        &self,
        handle: ResourceHandle,
    ) -> Result<&T, FrameGraphError> {
        Ok(&self.entry(handle)?.slot::<T>()?.resource)
    }

    pub(crate) fn resource_mut<T: FrameGraphResource<B>>(
        &mut self,
        handle: ResourceHandle,
    ) -> Result<&mut T, FrameGraphError> {
        Ok(&mut self.entry_mut(handle)?.slot_mut::<T>()?.resource)
    }

    pub(crate) fn desc<T: FrameGraphResource<B>>(
        &self,
        handle: ResourceHandle,
    ) -> Result<&T::Desc, FrameGraphError> {
        Ok(&self.entry(handle)?.slot::<T>()?.desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Buffer {
        live: bool,
    }

    impl FrameGraphResource<u32> for Buffer {
        type Desc = usize;

        fn acquire(&mut self, allocations: &mut u32, _size: &usize) -> Result<(), FrameGraphError> {
            *allocations += 1;
            self.live = true;
            Ok(())
        }

        fn release(&mut self, allocations: &mut u32) -> Result<(), FrameGraphError> {
            *allocations -= 1;
            self.live = false;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Sampler;

    impl FrameGraphResource<u32> for Sampler {
        type Desc = ();

        fn acquire(&mut self, _: &mut u32, _: &()) -> Result<(), FrameGraphError> {
            Ok(())
        }

        fn release(&mut self, _: &mut u32) -> Result<(), FrameGraphError> {
            Ok(())
        }
    }

    #[test]
    fn test_default_handle_is_invalid() {
        let handle = ResourceHandle::default();
        assert!(!handle.is_valid());
        assert_eq!(handle.to_string(), "#invalid");
        assert_eq!(ResourceHandle::new(3).to_string(), "#3");
    }

    #[test]
    fn test_typed_access_through_erased_table() {
        let mut registry = ResourceRegistry::<u32>::new();
        let handle = registry.insert(
            ResourceEntry::new("vertices".into(), 256usize, Buffer::default(), false),
            None,
        );

        assert_eq!(*registry.desc::<Buffer>(handle).unwrap(), 256);
        let mut backend = 0;
        registry.entry_mut(handle).unwrap().resource.acquire(&mut backend).unwrap();
        assert_eq!(backend, 1);
        assert!(registry.resource::<Buffer>(handle).unwrap().live);

        registry.resource_mut::<Buffer>(handle).unwrap().live = false;
        assert!(!registry.resource::<Buffer>(handle).unwrap().live);
    }

    #[test]
    fn test_wrong_type_is_reported() {
        let mut registry = ResourceRegistry::<u32>::new();
        let handle = registry.insert(
            ResourceEntry::new("vertices".into(), 16usize, Buffer::default(), false),
            None,
        );

        let err = registry.resource::<Sampler>(handle).err().unwrap();
        assert!(matches!(err, FrameGraphError::TypeMismatch { ref name, .. } if name == "vertices"));
        assert!(registry.resource_mut::<Sampler>(handle).is_err());
        assert!(matches!(
            registry.resource::<Buffer>(ResourceHandle::new(7)),
            Err(FrameGraphError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_lifetime_overlap() {
        let mut lifetime = None;
        ResourceLifetime::extend(&mut lifetime, 2);
        ResourceLifetime::extend(&mut lifetime, 0);
        let lifetime = lifetime.unwrap();
        assert_eq!((lifetime.first_user, lifetime.last_user), (0, 2));

        let later = ResourceLifetime {
            first_user: 3,
            last_user: 4,
        };
        assert!(!lifetime.overlaps(&later));
        assert!(lifetime.overlaps(&ResourceLifetime {
            first_user: 2,
            last_user: 5,
        }));
    }
}
