//! Staleness resolution: which cells must run next, and in what order.
//!
//! Three rules, applied against the current snapshot and cylinder map:
//!
//! 1. A cylinder whose cell left the snapshot is torn down first.
//! 2. A cell whose request stamp is newer than its last honored run is
//!    pending with immediate priority.
//! 3. Walking the execution order, each cell inherits the maximum
//!    effective priority of its producers; the cell is pending when that
//!    exceeds its own last tick. This is how one re-run cascades down
//!    the whole consumer chain.
//!
//! The resolver is pure; the engine applies the conflict side effects it
//! reports.

use rustc_hash::FxHashMap;

use crate::cell::{CellId, Notebook};
use crate::engine::Cylinder;
use crate::graph::{CellGraph, NameConflict};

/// Effective scheduling priority of a cell. `Immediate` outranks every
/// tick: an explicit request runs as soon as topologically possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Tick(crate::cell::Tick),
    Immediate,
}

/// Everything one staleness resolution decides.
#[derive(Debug)]
pub struct Resolution {
    /// Cylinders whose cell left the snapshot, sorted by id. Torn down
    /// before anything runs.
    pub deletions: Vec<CellId>,
    /// Stale cells in execution order; index 0 runs next.
    pub pending: Vec<CellId>,
    /// Duplicate-definition conflicts, excluded from `pending`.
    pub conflicts: Vec<NameConflict>,
    /// Dependency-cycle members, excluded from `pending`.
    pub cyclic: Vec<CellId>,
}

impl Resolution {
    /// Nothing to tear down and nothing to run.
    pub fn is_quiescent(&self) -> bool {
        self.deletions.is_empty() && self.pending.is_empty()
    }
}

pub fn find_pending(
    notebook: &Notebook,
    graph: &CellGraph,
    cylinders: &FxHashMap<CellId, Cylinder>,
) -> Resolution {
    let mut deletions: Vec<CellId> = cylinders
        .keys()
        .copied()
        .filter(|id| !notebook.contains(*id))
        .collect();
    deletions.sort_unstable();

    let mut effective: FxHashMap<CellId, Priority> = FxHashMap::default();
    let mut pending = Vec::new();
    for &id in graph.order() {
        let Some(cylinder) = cylinders.get(&id) else {
            continue;
        };
        let requested = notebook
            .get(id)
            .is_some_and(|cell| cell.requested_at > cylinder.last_run);
        let own = Priority::Tick(cylinder.last_internal_run);
        let mut eff = if requested { Priority::Immediate } else { own };
        for producer in graph.producers_of(id) {
            if let Some(&upstream) = effective.get(&producer) {
                eff = eff.max(upstream);
            }
        }
        effective.insert(id, eff);
        if eff > own {
            pending.push(id);
        }
    }

    Resolution {
        deletions,
        pending,
        conflicts: graph.conflicts().to_vec(),
        cyclic: graph.cyclic().to_vec(),
    }
}
