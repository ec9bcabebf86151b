use crate::error::FrameGraphError;

use super::pass::PassRecord;
use super::resource::{FrameGraphResource, ResourceEntry, ResourceHandle, ResourceRegistry};

/// Declares the resources a pass creates, reads and writes.
///
/// Handed to the setup callback of [`FrameGraph::add_pass`](super::FrameGraph::add_pass).
/// Methods always return a handle so setup code stays linear; the first
/// misuse (an unknown or stale handle) is remembered and returned by
/// `add_pass`, which then discards the whole pass.
pub struct FrameGraphBuilder<'g, B> {
    resources: &'g mut ResourceRegistry<B>,
    pass: &'g mut PassRecord,
    pass_index: usize,
    error: Option<FrameGraphError>,
    /// Entries whose version this pass bumped, with their previous version.
    bumped: Vec<(usize, u32)>,
    entry_mark: usize,
    node_mark: usize,
}

impl<'g, B> FrameGraphBuilder<'g, B> {
    pub(crate) fn new(
        resources: &'g mut ResourceRegistry<B>,
        pass: &'g mut PassRecord,
        pass_index: usize,
    ) -> Self {
        let entry_mark = resources.entries.len();
        let node_mark = resources.nodes.len();
        Self {
            resources,
            pass,
            pass_index,
            error: None,
            bumped: Vec::new(),
            entry_mark,
            node_mark,
        }
    }

    /// Declares a new transient resource owned by this pass.
    ///
    /// The resource starts as `T::default()` and is acquired with `desc`
    /// right before its first user executes.
    pub fn create<T>(&mut self, name: impl Into<String>, desc: T::Desc) -> ResourceHandle
    where
        T: FrameGraphResource<B> + Default,
    {
        let entry = ResourceEntry::new(name.into(), desc, T::default(), false);
        let handle = self.resources.insert(entry, Some(self.pass_index));
        self.pass.creates.push(handle);
        handle
    }

    /// Declares a read of `handle`. Reading the same version twice is recorded once.
    pub fn read(&mut self, handle: ResourceHandle) -> ResourceHandle {
        if let Err(err) = self.resources.node(handle) {
            self.fail(err);
            return handle;
        }
        if !self.pass.produces(handle) && !self.pass.reads.contains(&handle) {
            self.pass.reads.push(handle);
        }
        handle
    }

    /// Declares a write of `handle` and returns the handle of the new version.
    ///
    /// Writing a resource this pass did not create also reads its previous
    /// version. Only the latest version of a resource can be written; a write
    /// through an older handle is rejected as stale.
    pub fn write(&mut self, handle: ResourceHandle) -> ResourceHandle {
        let (entry, version) = match self.resources.node(handle) {
            Ok(node) => (node.entry, node.version),
            Err(err) => {
                self.fail(err);
                return handle;
            }
        };

        if self.pass.creates.contains(&handle) {
            if !self.pass.writes.contains(&handle) {
                self.pass.writes.push(handle);
            }
            return handle;
        }
        if self.pass.writes.contains(&handle) {
            return handle;
        }

        let latest = self.resources.entries[entry].version;
        if version != latest {
            let name = self.resources.entries[entry].name.clone();
            self.fail(FrameGraphError::StaleHandle { name, handle });
            return handle;
        }

        self.read(handle);
        self.bumped.push((entry, latest));
        self.resources.entries[entry].version = latest + 1;
        let new_version = self
            .resources
            .push_node(entry, latest + 1, Some(self.pass_index), Some(handle));
        self.pass.writes.push(new_version);
        new_version
    }

    /// Keeps the pass alive even if nothing consumes its outputs.
    pub fn mark_as_persistent(&mut self) {
        self.pass.persistent = true;
    }

    /// Descriptor of a resource, e.g. to size a derived target.
    pub fn desc<T: FrameGraphResource<B>>(
        &self,
        handle: ResourceHandle,
    ) -> Result<&T::Desc, FrameGraphError> {
        self.resources.desc::<T>(handle)
    }

    fn fail(&mut self, err: FrameGraphError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Reports the first recorded error, undoing everything this pass
    /// declared so the graph is left as it was before setup.
    pub(crate) fn finish(self) -> Result<(), FrameGraphError> {
        let Some(err) = self.error else {
            return Ok(());
        };
        for &(entry, version) in self.bumped.iter().rev() {
            if let Some(entry) = self.resources.entries.get_mut(entry) {
                entry.version = version;
            }
        }
        self.resources.nodes.truncate(self.node_mark);
        self.resources.entries.truncate(self.entry_mark);
        Err(err)
    }
}
