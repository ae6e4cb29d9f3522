//! Cell identity and notebook snapshot types.
//!
//! A [`Notebook`] is the caller-owned blueprint the engine converges to:
//! an ordered list of [`Cell`]s, each carrying its current source text and
//! the timestamp of the most recent run request. The engine never mutates
//! a snapshot; the caller hands in a fresh one after every edit.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Unique identifier for a cell, assigned by the caller and stable for
/// the cell's whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(pub usize);

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell_{}", self.0)
    }
}

/// One step of the engine's strictly increasing internal counter.
///
/// Ticks order runs causally without wall-clock time: a cell is fresh
/// relative to an upstream producer exactly when its own tick is the
/// larger one.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Tick(pub u64);

impl Tick {
    pub const ZERO: Tick = Tick(0);
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied monotonic timestamp attached to run requests.
///
/// [`RunStamp::NEVER`] is the minimum value; a cell whose request stamp
/// still equals it has never been asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunStamp(pub i64);

impl RunStamp {
    pub const NEVER: RunStamp = RunStamp(i64::MIN);
}

impl Default for RunStamp {
    fn default() -> Self {
        RunStamp::NEVER
    }
}

/// What kind of content a cell holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    /// Executable code, parsed for imported/exported names.
    Code,
    /// Prose. Scheduled like any other cell but never parsed; the runner
    /// decides what running one means (typically rendering).
    Text,
}

/// One editable unit of the notebook.
#[derive(Debug, Clone)]
pub struct Cell {
    pub id: CellId,
    pub kind: CellKind,
    pub code: Arc<str>,
    /// Bumped by the caller whenever the user asks to (re-)run this cell.
    pub requested_at: RunStamp,
}

impl Cell {
    /// Creates a code cell that has not been asked to run yet.
    pub fn code(id: CellId, source: impl Into<Arc<str>>) -> Self {
        Cell {
            id,
            kind: CellKind::Code,
            code: source.into(),
            requested_at: RunStamp::NEVER,
        }
    }

    /// Creates a text cell.
    pub fn text(id: CellId, source: impl Into<Arc<str>>) -> Self {
        Cell {
            id,
            kind: CellKind::Text,
            code: source.into(),
            requested_at: RunStamp::NEVER,
        }
    }

    /// Sets the request stamp, builder style.
    pub fn requested(mut self, stamp: RunStamp) -> Self {
        self.requested_at = stamp;
        self
    }

    /// Replaces the cell's source text.
    pub fn set_code(&mut self, source: impl Into<Arc<str>>) {
        self.code = source.into();
    }

    /// Records a run request at the given stamp.
    pub fn request_run(&mut self, stamp: RunStamp) {
        self.requested_at = self.requested_at.max(stamp);
    }
}

/// An ordered snapshot of the whole notebook.
///
/// Cell order is part of the snapshot: it breaks ties in the dependency
/// order and fixes the input-resolution scan order, so identical
/// notebooks always schedule identically.
#[derive(Debug, Clone, Default)]
pub struct Notebook {
    cells: Vec<Cell>,
}

impl Notebook {
    /// Builds a snapshot, keeping the first occurrence of any duplicated
    /// cell id.
    pub fn new(cells: Vec<Cell>) -> Self {
        let mut seen = rustc_hash::FxHashSet::default();
        let mut kept = Vec::with_capacity(cells.len());
        for cell in cells {
            if seen.insert(cell.id) {
                kept.push(cell);
            } else {
                tracing::warn!(cell = %cell.id, "duplicate cell id in snapshot, keeping first");
            }
        }
        Notebook { cells: kept }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn get(&self, id: CellId) -> Option<&Cell> {
        self.cells.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.cells.iter_mut().find(|c| c.id == id)
    }

    pub fn contains(&self, id: CellId) -> bool {
        self.get(id).is_some()
    }

    /// The cell's position in snapshot order.
    pub fn position(&self, id: CellId) -> Option<usize> {
        self.cells.iter().position(|c| c.id == id)
    }

    /// Appends a cell, replacing any existing cell with the same id in
    /// place.
    pub fn push(&mut self, cell: Cell) {
        match self.get_mut(cell.id) {
            Some(existing) => *existing = cell,
            None => self.cells.push(cell),
        }
    }

    /// Removes a cell from the snapshot.
    pub fn remove(&mut self, id: CellId) -> Option<Cell> {
        let at = self.position(id)?;
        Some(self.cells.remove(at))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter()
    }
}

impl FromIterator<Cell> for Notebook {
    fn from_iter<T: IntoIterator<Item = Cell>>(iter: T) -> Self {
        Notebook::new(iter.into_iter().collect())
    }
}
