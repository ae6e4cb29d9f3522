//! Multi-document undo/redo history for the Janus notebook environment.
//!
//! This crate provides:
//! - A span-based change algebra with apply, invert, compose and
//!   position mapping
//! - Composite changes and descriptions addressing many cell documents
//!   at once
//! - Structural effects (cell addition and removal) with pluggable
//!   inverters
//! - The history engine: grouped events on done/undone branches,
//!   coalescing, excluded-edit folding, selection undo, bounded depth
//! - Serializable snapshots of both branches

pub mod changes;
pub mod composite;
pub mod effect;
pub mod error;
pub mod history;
pub mod persist;

pub use changes::{Change, ChangeDesc, ChangeSet, SelRange, Selection, Span};
pub use composite::{CompositeChanges, CompositeDesc, DocSet};
pub use effect::{EffectInverter, ScopedEffect, StructuralEffect, invert_structural};
pub use error::{HistoryError, Result};
pub use history::{
    History, HistoryConfig, HistoryTransaction, Isolate, Transaction, UserEvent,
};
pub use persist::{EventSnapshot, HistorySnapshot};
