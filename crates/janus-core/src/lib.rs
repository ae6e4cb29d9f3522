//! Core engine for the Janus reactive notebook environment.
//!
//! This crate provides:
//! - Dependency graph construction over cell name bindings
//! - Staleness resolution with request and cascade priorities
//! - The execution engine: per-cell runtime state, snapshot coalescing,
//!   cancellation with awaited cleanup
//! - Collaborator traits for pluggable parsers and runners

pub mod cancel;
pub mod cell;
pub mod engine;
pub mod error;
pub mod graph;
pub mod parse;
pub mod runner;
pub mod schedule;

pub use cancel::{CancelScope, CancelSignal};
pub use cell::{Cell, CellId, CellKind, Notebook, RunStamp, Tick};
pub use engine::{CylinderState, Engine, EngineListener, RunTrace};
pub use error::{Error, Result};
pub use graph::{CellGraph, EdgeKind, GraphInput, NameConflict};
pub use parse::{CellParser, ParseCache, ParseOutcome, ParsedCell};
pub use runner::{CellRunner, CellValue, RunOutcome, RunRequest, RunResult};
pub use schedule::{Priority, Resolution, find_pending};
