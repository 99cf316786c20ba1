//! The bipartite audio/event graph (distilled spec §4.2 "Processor & graph model").
//!
//! A [`Graph`] is an edge set over `{audio_edges, event_edges}` where each
//! endpoint is `{node, port_index}`. It is the mutation-time representation
//! built by the engine orchestrator; [`Graph::finalize`] inserts the minimum
//! set of mix nodes so every input port has at most one incoming edge, after
//! which `piejam-engine`'s DAG compiler walks the graph to produce a
//! schedulable DAG of nodes. This module owns topology only — no scheduling,
//! no threads. Mutation happens on the control thread; the audio thread
//! never sees a `Graph`, only the compiled DAG built from it.

pub mod edge;
pub mod node;

#[cfg(not(feature = "std"))]
use alloc::boxed::Box;
#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

pub use edge::{Edge, EdgeId, EdgeKind, PortRef};
pub use node::NodeId;

use crate::processor::{Component, EventConverter, Mix, Processor};
use node::NodeData;

/// Errors that can occur while mutating a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphError {
    /// Referenced a node id that isn't in this graph.
    UnknownNode(NodeId),
    /// Referenced an audio port index beyond the node's port count.
    InvalidAudioPort {
        /// The offending node.
        node: NodeId,
        /// The out-of-range port index.
        port: usize,
    },
    /// Referenced an event port index beyond the node's port count.
    InvalidEventPort {
        /// The offending node.
        node: NodeId,
        /// The out-of-range port index.
        port: usize,
    },
}

/// The endpoints a [`Component`] exposes to its caller once wired into a [`Graph`].
///
/// Mirrors `Component`'s port shape: the caller connects to these
/// `PortRef`s exactly as it would to a plain processor's ports.
#[derive(Debug, Clone)]
pub struct ComponentPorts {
    /// One entry per input port the component declared.
    pub inputs: Vec<PortRef>,
    /// One entry per output port the component declared.
    pub outputs: Vec<PortRef>,
    /// One entry per event-input port the component declared.
    pub event_inputs: Vec<PortRef>,
    /// One entry per event-output port the component declared.
    pub event_outputs: Vec<PortRef>,
}

/// A bipartite edge set over processor nodes' audio and event ports.
///
/// `add_*` helpers insert the identity/mix/clip/event-converter processors
/// named in distilled §4.2; `finalize` performs the mix-insertion pass the
/// spec requires before a graph is handed to the DAG compiler.
pub struct Graph {
    nodes: Vec<NodeData>,
    edges: Vec<Edge>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Inserts a processor as a new node, returning its id.
    pub fn add_node(&mut self, processor: Box<dyn Processor + Send>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData::new(processor));
        id
    }

    /// Inserts an [`crate::processor::Identity`] node.
    pub fn add_identity(&mut self) -> NodeId {
        self.add_node(Box::new(crate::processor::Identity))
    }

    /// Inserts a [`Mix`] node summing `n` audio inputs.
    pub fn add_mix(&mut self, n: usize) -> NodeId {
        self.add_node(Box::new(Mix::new(n)))
    }

    /// Inserts a [`crate::processor::Clip`] node.
    pub fn add_clip(&mut self) -> NodeId {
        self.add_node(Box::new(crate::processor::Clip))
    }

    /// Inserts a stateless event converter node.
    pub fn add_event_converter(
        &mut self,
        input_name: &'static str,
        output_name: &'static str,
        convert: fn(&[crate::processor::Event], &mut Vec<crate::processor::Event>),
    ) -> NodeId {
        self.add_node(Box::new(EventConverter::new(
            input_name,
            output_name,
            convert,
        )))
    }

    /// Wires a [`Component`] into this graph, returning the port refs the
    /// caller should connect to.
    pub fn add_component(&mut self, component: Box<dyn Component>) -> ComponentPorts {
        component.connect(self)
    }

    fn check_node(&self, node: NodeId) -> Result<(), GraphError> {
        if (node.0 as usize) < self.nodes.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownNode(node))
        }
    }

    /// Connects an audio output port to an audio input port.
    ///
    /// Multiple edges may target the same input port; `finalize` inserts a
    /// mix node to collapse them before the graph is compiled.
    pub fn connect_audio(&mut self, from: PortRef, to: PortRef) -> Result<EdgeId, GraphError> {
        self.check_node(from.node)?;
        self.check_node(to.node)?;
        {
            let src = &self.nodes[from.node.0 as usize];
            if from.port >= src.audio_outputs.len() {
                return Err(GraphError::InvalidAudioPort {
                    node: from.node,
                    port: from.port,
                });
            }
            let dst = &self.nodes[to.node.0 as usize];
            if to.port >= dst.audio_inputs.len() {
                return Err(GraphError::InvalidAudioPort {
                    node: to.node,
                    port: to.port,
                });
            }
        }
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge {
            from,
            to,
            kind: EdgeKind::Audio,
        });
        self.nodes[from.node.0 as usize].audio_outputs[from.port].push(id);
        // A destination port may temporarily receive several incoming edges
        // until `finalize` inserts a mix node; we record the most recent
        // here and let `finalize` find the full fan-in by scanning `edges`.
        self.nodes[to.node.0 as usize].audio_inputs[to.port] = Some(id);
        Ok(id)
    }

    /// Connects an event output port to an event input port.
    pub fn connect_event(&mut self, from: PortRef, to: PortRef) -> Result<EdgeId, GraphError> {
        self.check_node(from.node)?;
        self.check_node(to.node)?;
        {
            let src = &self.nodes[from.node.0 as usize];
            if from.port >= src.event_outputs.len() {
                return Err(GraphError::InvalidEventPort {
                    node: from.node,
                    port: from.port,
                });
            }
            let dst = &self.nodes[to.node.0 as usize];
            if to.port >= dst.event_inputs.len() {
                return Err(GraphError::InvalidEventPort {
                    node: to.node,
                    port: to.port,
                });
            }
        }
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge {
            from,
            to,
            kind: EdgeKind::Event,
        });
        self.nodes[from.node.0 as usize].event_outputs[from.port].push(id);
        self.nodes[to.node.0 as usize].event_inputs[to.port] = Some(id);
        Ok(id)
    }

    /// Number of nodes currently in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All edges currently in the graph (audio and event).
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Iterates over `(node id, processor)` pairs, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &(dyn Processor + Send))> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n.processor.as_ref()))
    }

    fn audio_fan_in(&self, node: NodeId, port: usize) -> Vec<EdgeId> {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(i, e)| {
                if matches!(e.kind, EdgeKind::Audio) && e.to == PortRef::new(node, port) {
                    Some(EdgeId(i as u32))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Inserts the minimum set of N-to-1 mix nodes so that every audio input
    /// port has at most one incoming edge. Idempotent: every port this pass
    /// touches ends up with fan-in exactly 1 (through the inserted mix
    /// node), so a second call finds no port with fan-in > 1 and does
    /// nothing.
    pub fn finalize(&mut self) {
        // Snapshot targets before mutating — inserting mix nodes appends new
        // nodes/edges that must not themselves be rescanned in this pass.
        let mut targets = Vec::new();
        for node_idx in 0..self.nodes.len() {
            let num_ports = self.nodes[node_idx].audio_inputs.len();
            for port in 0..num_ports {
                let fan_in = self.audio_fan_in(NodeId(node_idx as u32), port);
                if fan_in.len() > 1 {
                    targets.push((NodeId(node_idx as u32), port, fan_in));
                }
            }
        }

        for (node, port, fan_in) in targets {
            let sources: Vec<PortRef> = fan_in
                .iter()
                .map(|e| self.edges[e.0 as usize].from)
                .collect();
            let mix = self.add_mix(sources.len());
            for (i, src) in sources.into_iter().enumerate() {
                self.connect_audio(src, PortRef::new(mix, i))
                    .expect("mix fan-in connect must succeed: ports freshly sized");
            }
            self.connect_audio(PortRef::new(mix, 0), PortRef::new(node, port))
                .expect("mix output connect must succeed: ports freshly sized");
        }
    }

    /// Consumes the graph, handing back its processors in node-id order
    /// plus the full edge list.
    ///
    /// The only place node ownership moves out of a `Graph` — used by
    /// `piejam-engine`'s DAG compiler, which needs to own each processor
    /// inside the task closure that invokes it every period. `Graph` itself
    /// has no scheduling concerns and never runs a processor.
    pub fn into_parts(self) -> (Vec<Box<dyn Processor + Send>>, Vec<Edge>) {
        let processors = self.nodes.into_iter().map(|n| n.processor).collect();
        (processors, self.edges)
    }

    /// Emits a Graphviz `digraph` description of the current topology, for
    /// debugging. Gated behind `debug-graphviz` so it never touches the
    /// release build's dependency/size budget.
    #[cfg(feature = "debug-graphviz")]
    pub fn to_dot(&self) -> alloc::string::String {
        use core::fmt::Write;
        let mut out = alloc::string::String::new();
        let _ = writeln!(out, "digraph piejam {{");
        for (i, node) in self.nodes.iter().enumerate() {
            let _ = writeln!(out, "  n{i} [label=\"{}\"];", node.processor.type_name());
        }
        for edge in &self.edges {
            let style = match edge.kind {
                EdgeKind::Audio => "solid",
                EdgeKind::Event => "dashed",
            };
            let _ = writeln!(
                out,
                "  n{} -> n{} [style={style}, label=\"{}->{}\"];",
                edge.from.node.0, edge.to.node.0, edge.from.port, edge.to.port
            );
        }
        let _ = writeln!(out, "}}");
        out
    }
}
