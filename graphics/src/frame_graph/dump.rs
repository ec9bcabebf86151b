//! Graphviz export of a compiled frame graph.

use std::io::Write;

use super::pass::PassRecord;
use super::resource::{ResourceHandle, ResourceRegistry};

const PASS_COLOR: &str = "darkorange";
const CULLED_PASS_COLOR: &str = "grey";
const TRANSIENT_COLOR: &str = "skyblue";
const IMPORTED_COLOR: &str = "steelblue";
const CREATE_EDGE_COLOR: &str = "seagreen";
const WRITE_EDGE_COLOR: &str = "gold";
const READ_EDGE_COLOR: &str = "firebrick";

/// Writes passes and resource versions as a DOT digraph.
///
/// Passes are `pass{i}` nodes and resource versions are `res{i}` nodes, so
/// arbitrary names never clash with DOT syntax.
pub(crate) fn write_dot<B>(
    out: &mut dyn Write,
    passes: &[PassRecord],
    resources: &ResourceRegistry<B>,
) -> std::io::Result<()> {
    writeln!(out, "digraph FrameGraph {{")?;
    writeln!(out, "rankdir = LR")?;
    writeln!(out, "splines = ortho")?;
    writeln!(
        out,
        "node [shape=rectangle, fontname=\"helvetica\", fontsize=12]"
    )?;
    writeln!(out)?;

    for (index, pass) in passes.iter().enumerate() {
        let color = if pass.culled {
            CULLED_PASS_COLOR
        } else {
            PASS_COLOR
        };
        writeln!(
            out,
            "pass{index} [label=\"{}\\nRefs: {}\", style=\"rounded, filled\", fillcolor={color}]",
            escape(&pass.name),
            pass.refcount,
        )?;
    }
    writeln!(out)?;

    for (index, node) in resources.nodes.iter().enumerate() {
        let entry = &resources.entries[node.entry];
        let color = if entry.imported {
            IMPORTED_COLOR
        } else {
            TRANSIENT_COLOR
        };
        writeln!(
            out,
            "res{index} [label=\"{}\\nVersion: {}\\nRefs: {}\", style=filled, fillcolor={color}]",
            escape(&entry.name),
            node.version,
            node.refcount,
        )?;
    }
    writeln!(out)?;

    for (index, pass) in passes.iter().enumerate() {
        let written: Vec<ResourceHandle> = pass
            .writes
            .iter()
            .copied()
            .filter(|handle| !pass.creates.contains(handle))
            .collect();
        write_edges(out, &format!("pass{index}"), &pass.creates, CREATE_EDGE_COLOR)?;
        write_edges(out, &format!("pass{index}"), &written, WRITE_EDGE_COLOR)?;
        for read in &pass.reads {
            writeln!(
                out,
                "res{} -> pass{index} [color = {READ_EDGE_COLOR}]",
                read.index()
            )?;
        }
    }

    writeln!(out, "}}")
}

fn write_edges(
    out: &mut dyn Write,
    from: &str,
    targets: &[ResourceHandle],
    color: &str,
) -> std::io::Result<()> {
    if targets.is_empty() {
        return Ok(());
    }
    let targets: Vec<String> = targets
        .iter()
        .map(|handle| format!("res{}", handle.index()))
        .collect();
    writeln!(out, "{from} -> {{ {} }} [color = {color}]", targets.join(" "))
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}
