//! Frame graph compilation.
//!
//! Turns the passes declared during building into an execution plan:
//!
//! 1. **Reference counting** - a pass counts the versions it produces, a
//!    version counts the passes reading it
//! 2. **Culling** - flood fill from unreferenced versions; producers left
//!    without consumers are culled and release their own inputs in turn
//! 3. **Topological sort** - Kahn's algorithm over producer/consumer and
//!    write-after-read edges, failing on cycles
//! 4. **Lifetimes** - first and last user of every resource, which decide
//!    where it is acquired and released
//!
//! Imported resources act as sinks: writing one keeps the writer alive even
//! if no pass reads the result, because someone outside the graph will.

use std::collections::VecDeque;

use tde_core::profile_scope;

use crate::error::FrameGraphError;

use super::pass::PassRecord;
use super::resource::{ResourceEntry, ResourceLifetime, ResourceNode, ResourceRegistry};

/// Execution plan of a compiled frame graph.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct CompiledPlan {
    /// Surviving passes in execution order.
    pub(crate) order: Vec<usize>,
    /// Transient entries to acquire before each step.
    pub(crate) acquire_at: Vec<Vec<usize>>,
    /// Transient entries to release after each step.
    pub(crate) release_at: Vec<Vec<usize>>,
}

pub(crate) fn compile<B>(
    passes: &mut [PassRecord],
    resources: &mut ResourceRegistry<B>,
) -> Result<CompiledPlan, FrameGraphError> {
    let ResourceRegistry { entries, nodes } = resources;

    count_references(passes, nodes);
    {
        profile_scope!("cull_passes");
        cull(passes, entries, nodes);
    }
    let order = {
        profile_scope!("sort_passes");
        let edges = dependency_edges(passes, nodes);
        sort_passes(passes, &edges)?
    };
    Ok(assign_lifetimes(order, passes, entries, nodes))
}

fn count_references(passes: &mut [PassRecord], nodes: &mut [ResourceNode]) {
    for node in nodes.iter_mut() {
        node.refcount = 0;
    }
    for pass in passes.iter_mut() {
        pass.refcount = pass.produced().count() as u32;
        pass.culled = false;
        for read in &pass.reads {
            nodes[read.index()].refcount += 1;
        }
    }
}

fn cull<B>(passes: &mut [PassRecord], entries: &[ResourceEntry<B>], nodes: &mut [ResourceNode]) {
    let is_sink = |node: &ResourceNode| entries[node.entry].imported;

    let mut unreferenced: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| node.refcount == 0 && !is_sink(node))
        .map(|(index, _)| index)
        .collect();

    // Passes producing nothing are dead from the start.
    for index in 0..passes.len() {
        if passes[index].refcount == 0 && !passes[index].persistent {
            cull_pass(&mut passes[index], entries, nodes, &mut unreferenced);
        }
    }

    while let Some(node) = unreferenced.pop() {
        let Some(producer) = nodes[node].producer else {
            continue;
        };
        let pass = &mut passes[producer];
        pass.refcount = pass.refcount.saturating_sub(1);
        if pass.refcount == 0 && !pass.persistent && !pass.culled {
            cull_pass(pass, entries, nodes, &mut unreferenced);
        }
    }
}

fn cull_pass<B>(
    pass: &mut PassRecord,
    entries: &[ResourceEntry<B>],
    nodes: &mut [ResourceNode],
    unreferenced: &mut Vec<usize>,
) {
    log::debug!("culling frame graph pass '{}'", pass.name);
    pass.culled = true;
    for read in &pass.reads {
        let node = &mut nodes[read.index()];
        node.refcount = node.refcount.saturating_sub(1);
        if node.refcount == 0 && !entries[node.entry].imported {
            unreferenced.push(read.index());
        }
    }
}

/// Edges between surviving passes as `(dependent, dependency)` pairs.
///
/// A reader depends on the producer of the version it reads. A writer also
/// depends on every other reader of the version it overwrites, so those
/// reads see the old contents.
fn dependency_edges(passes: &[PassRecord], nodes: &[ResourceNode]) -> Vec<(usize, usize)> {
    let mut readers: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (index, pass) in passes.iter().enumerate().filter(|(_, pass)| !pass.culled) {
        for read in &pass.reads {
            readers[read.index()].push(index);
        }
    }

    let mut edges = Vec::new();
    for (dependent, pass) in passes.iter().enumerate().filter(|(_, pass)| !pass.culled) {
        for read in &pass.reads {
            if let Some(producer) = nodes[read.index()].producer
                && producer != dependent
                && !passes[producer].culled
            {
                edges.push((dependent, producer));
            }
        }
        for write in &pass.writes {
            let Some(previous) = nodes[write.index()].previous else {
                continue;
            };
            for &reader in &readers[previous.index()] {
                if reader != dependent {
                    edges.push((dependent, reader));
                }
            }
        }
    }

    edges.sort_unstable();
    edges.dedup();
    edges
}

/// Orders the surviving passes so every dependency runs first.
///
/// Ties keep declaration order. On a cycle, the error names every pass that
/// could not be scheduled.
pub(crate) fn sort_passes(
    passes: &[PassRecord],
    edges: &[(usize, usize)],
) -> Result<Vec<usize>, FrameGraphError> {
    let n = passes.len();

    // Edge (dependent, dependency) means dependent has one more in-degree
    let mut in_degree = vec![0u32; n];
    for &(dependent, _dependency) in edges {
        in_degree[dependent] += 1;
    }

    let mut queue: VecDeque<usize> = (0..n)
        .filter(|&pass| !passes[pass].culled && in_degree[pass] == 0)
        .collect();
    let mut order = Vec::with_capacity(n);

    while let Some(pass) = queue.pop_front() {
        order.push(pass);
        for &(dependent, dependency) in edges {
            if dependency == pass {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    let alive = passes.iter().filter(|pass| !pass.culled).count();
    if order.len() != alive {
        let stuck = (0..n)
            .filter(|&pass| !passes[pass].culled && in_degree[pass] > 0)
            .map(|pass| passes[pass].name.clone())
            .collect();
        return Err(FrameGraphError::CyclicDependency { passes: stuck });
    }

    Ok(order)
}

fn assign_lifetimes<B>(
    order: Vec<usize>,
    passes: &[PassRecord],
    entries: &mut [ResourceEntry<B>],
    nodes: &[ResourceNode],
) -> CompiledPlan {
    for entry in entries.iter_mut() {
        entry.lifetime = None;
    }
    for (step, &pass) in order.iter().enumerate() {
        for handle in passes[pass].used() {
            let entry = nodes[handle.index()].entry;
            ResourceLifetime::extend(&mut entries[entry].lifetime, step);
        }
    }

    let mut acquire_at = vec![Vec::new(); order.len()];
    let mut release_at = vec![Vec::new(); order.len()];
    for (index, entry) in entries.iter().enumerate() {
        if entry.imported {
            continue;
        }
        if let Some(lifetime) = entry.lifetime {
            acquire_at[lifetime.first_user].push(index);
            release_at[lifetime.last_user].push(index);
        }
    }

    CompiledPlan {
        order,
        acquire_at,
        release_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_graph::resource::{FrameGraphResource, ResourceHandle};

    #[derive(Default)]
    struct Target;

    impl FrameGraphResource<()> for Target {
        type Desc = ();

        fn acquire(&mut self, _: &mut (), _: &()) -> Result<(), FrameGraphError> {
            Ok(())
        }

        fn release(&mut self, _: &mut ()) -> Result<(), FrameGraphError> {
            Ok(())
        }
    }

    /// Hand-assembled graph, bypassing the builder.
    struct Fixture {
        passes: Vec<PassRecord>,
        resources: ResourceRegistry<()>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                passes: Vec::new(),
                resources: ResourceRegistry::new(),
            }
        }

        fn pass(&mut self, name: &str) -> usize {
            self.passes.push(PassRecord::new(name.into()));
            self.passes.len() - 1
        }

        fn create(&mut self, pass: usize, name: &str) -> ResourceHandle {
            let entry = ResourceEntry::new(name.into(), (), Target, false);
            let handle = self.resources.insert(entry, Some(pass));
            self.passes[pass].creates.push(handle);
            handle
        }

        fn import(&mut self, name: &str) -> ResourceHandle {
            self.resources
                .insert(ResourceEntry::new(name.into(), (), Target, true), None)
        }

        fn read(&mut self, pass: usize, handle: ResourceHandle) {
            self.passes[pass].reads.push(handle);
        }

        fn write(&mut self, pass: usize, handle: ResourceHandle) -> ResourceHandle {
            let node = self.resources.nodes[handle.index()].clone();
            self.read(pass, handle);
            let written =
                self.resources
                    .push_node(node.entry, node.version + 1, Some(pass), Some(handle));
            self.passes[pass].writes.push(written);
            written
        }

        fn compile(&mut self) -> Result<CompiledPlan, FrameGraphError> {
            compile(&mut self.passes, &mut self.resources)
        }

        fn names(&self, plan: &CompiledPlan) -> Vec<&str> {
            plan.order
                .iter()
                .map(|&pass| self.passes[pass].name.as_str())
                .collect()
        }
    }

    #[test]
    fn test_compile_empty_graph() {
        let mut graph = Fixture::new();
        let plan = graph.compile().unwrap();
        assert_eq!(plan, CompiledPlan::default());
    }

    #[test]
    fn test_linear_chain_into_import() {
        // gbuffer -> lighting -> backbuffer
        let mut graph = Fixture::new();
        let backbuffer = graph.import("backbuffer");
        let gbuffer = graph.pass("gbuffer");
        let lighting = graph.pass("lighting");

        let albedo = graph.create(gbuffer, "albedo");
        graph.read(lighting, albedo);
        graph.write(lighting, backbuffer);

        let plan = graph.compile().unwrap();
        assert_eq!(graph.names(&plan), vec!["gbuffer", "lighting"]);
        assert_eq!(plan.acquire_at, vec![vec![1], vec![]]);
        assert_eq!(plan.release_at, vec![vec![], vec![1]]);
        assert_eq!(
            graph.resources.entries[0].lifetime,
            Some(ResourceLifetime {
                first_user: 1,
                last_user: 1
            })
        );
    }

    #[test]
    fn test_unused_chain_is_culled_transitively() {
        // depth -> ssao, nobody reads ssao
        let mut graph = Fixture::new();
        let depth_pass = graph.pass("depth");
        let ssao_pass = graph.pass("ssao");
        let depth = graph.create(depth_pass, "depth");
        graph.read(ssao_pass, depth);
        graph.create(ssao_pass, "ao");

        let plan = graph.compile().unwrap();
        assert!(plan.order.is_empty());
        assert!(graph.passes.iter().all(|pass| pass.culled));
        assert_eq!(graph.resources.nodes[depth.index()].refcount, 0);
    }

    #[test]
    fn test_persistent_pass_keeps_its_inputs_alive() {
        let mut graph = Fixture::new();
        let shadow = graph.pass("shadow");
        let debug = graph.pass("debug_overlay");
        let unrelated = graph.pass("unrelated");

        let shadow_map = graph.create(shadow, "shadow_map");
        graph.read(debug, shadow_map);
        graph.passes[debug].persistent = true;
        graph.create(unrelated, "scratch");

        let plan = graph.compile().unwrap();
        assert_eq!(graph.names(&plan), vec!["shadow", "debug_overlay"]);
        assert!(graph.passes[unrelated].culled);
        assert_eq!(graph.passes[shadow].refcount, 1);
    }

    #[test]
    fn test_mutual_read_write_is_a_cycle() {
        // Each pass reads the old version of what the other one overwrites.
        let mut graph = Fixture::new();
        let color = graph.import("color");
        let depth = graph.import("depth");
        let a = graph.pass("A");
        let b = graph.pass("B");

        graph.write(a, color);
        graph.read(a, depth);
        graph.write(b, depth);
        graph.read(b, color);

        let err = graph.compile().unwrap_err();
        match err {
            FrameGraphError::CyclicDependency { passes } => assert_eq!(passes, vec!["A", "B"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_readers_of_old_version_run_before_writer() {
        let mut graph = Fixture::new();
        let history = graph.import("history");
        let writer = graph.pass("accumulate");
        let reader = graph.pass("motion_blur");

        graph.write(writer, history);
        graph.read(reader, history);
        graph.passes[reader].persistent = true;

        let plan = graph.compile().unwrap();
        assert_eq!(graph.names(&plan), vec!["motion_blur", "accumulate"]);
    }

    #[test]
    fn test_sort_keeps_declaration_order_for_independent_passes() {
        let mut passes: Vec<PassRecord> = ["A", "B", "C", "D"]
            .iter()
            .map(|name| PassRecord::new((*name).into()))
            .collect();
        // D -> C, B -> A
        let edges = [(3, 2), (1, 0)];
        assert_eq!(sort_passes(&passes, &edges).unwrap(), vec![0, 2, 1, 3]);

        passes[0].culled = true;
        assert_eq!(sort_passes(&passes, &[(3, 2)]).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_partial_cycle_names_only_stuck_passes() {
        let passes: Vec<PassRecord> = ["A", "B", "C", "D"]
            .iter()
            .map(|name| PassRecord::new((*name).into()))
            .collect();
        // A -> B -> C -> A, D independent
        let edges = [(1, 0), (2, 1), (0, 2)];
        let err = sort_passes(&passes, &edges).unwrap_err();
        assert!(matches!(
            err,
            FrameGraphError::CyclicDependency { ref passes } if passes == &["A", "B", "C"]
        ));
    }
}
