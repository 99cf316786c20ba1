//! PieJam Core - value cells, parameter descriptors and the processor/graph
//! model for the PieJam real-time audio mixer engine.
//!
//! # Core Abstractions
//!
//! ## Values & Parameters
//!
//! - [`ValueCell`] - lock-free single-writer/many-reader scalar slot
//! - [`SharedRead`] - cheaply-cloneable cached read handle to a `ValueCell`
//! - [`Box`] - copy-on-write wrapper, equality is pointer equality
//! - [`BoxedMap`] / [`IdMap`] - copy-on-write `BTreeMap`
//! - [`ParamStore`] - owns one value cell + descriptor per live parameter
//! - [`ParamDescriptor`] / [`ParamId`] / [`ParamScale`] / [`ParamFlags`] -
//!   immutable per-parameter metadata and normalization rules
//!
//! ## Processor & Graph
//!
//! - [`Processor`] - the abstract unit of computation in the audio/event graph
//! - [`Component`] - a reusable sub-graph wired into an enclosing [`Graph`]
//! - [`Graph`] - the bipartite audio/event edge set mutated on the control
//!   thread and compiled into a schedulable DAG by `piejam-engine`
//! - [`Smooth`] - ramps an output towards an event-carried target rather
//!   than jumping to it, for zipper-free parameter changes
//!
//! ## Utilities
//!
//! - Level conversion: [`db_to_linear`], [`linear_to_db`], [`lerp`]
//! - [`SmoothedParam`] / [`LinearSmoothedParam`] - plain per-sample smoothing
//!   primitives underneath [`Smooth`]
//!
//! # no_std Support
//!
//! This crate is `no_std` compatible for embedded targets. Disable the
//! default `std` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! piejam-core = { version = "0.1", default-features = false }
//! ```
//!
//! # Design Principles
//!
//! - **Real-time safe**: no allocation, no locking and no blocking in
//!   [`Processor::process`] or in a [`ValueCell`] read/write.
//! - **No dependency on std**: pure `no_std` with `libm` for math.
//! - **Object-safe traits**: processors and components are stored behind
//!   `dyn` so heterogeneous graphs live in one `Vec`.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod boxed_map;
pub mod graph;
pub mod math;
pub mod param;
pub mod param_info;
pub mod processor;
pub mod store;
pub mod value;

pub use boxed_map::{BoxedMap, IdMap};
pub use graph::{ComponentPorts, Edge, EdgeId, EdgeKind, Graph, GraphError, NodeId, PortRef};
pub use math::{db_to_linear, lerp, linear_to_db};
pub use param::{LinearSmoothedParam, SmoothedParam};
pub use param_info::{
    ParamDescriptor, ParamDomain, ParamFlags, ParamId, ParamScale, ParamUnit, ParameterInfo,
};
pub use processor::{
    AudioResult, Clip, Component, Event, EventArena, EventConverter, EventPortDescriptor,
    Identity, Mix, ProcessContext, Processor, Smooth,
};
pub use store::ParamStore;
pub use value::{Box, Locked, SharedRead, SharedWrite, ValueCell};
