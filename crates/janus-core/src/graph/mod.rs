//! Dependency graph construction over produced and consumed names.

mod builder;

pub use builder::{CellGraph, EdgeKind, GraphInput, NameConflict};
