//! DAG scheduler, real-time worker pool and engine orchestrator for the
//! PieJam audio mixer. `piejam-core` describes the mutable
//! [`piejam_core::Graph`] the control thread edits; this crate compiles a
//! finalized graph into a [`dag::Dag`] and runs it once per period, either
//! on a single thread ([`dag::run_st`]) or across a [`worker::WorkerPool`]
//! ([`dag::run_mt`]). [`orchestrator`] ties graph rebuilds to a wait-free
//! hand-off with the audio thread.

pub mod compile;
pub mod dag;
pub mod orchestrator;
pub mod worker;

pub use compile::{compile, CompileError};
pub use dag::{Dag, DagError, ThreadContext};
pub use orchestrator::{DynamicKeySharedObjectMap, Orchestrator};
pub use worker::{ThreadConfig, WorkerPool};
