//! Builds the producer→consumer graph for one notebook snapshot.
//!
//! Construction is pure and cheap (notebooks hold tens of cells): the
//! scheduler rebuilds the graph from scratch on every decision instead of
//! patching it incrementally.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell::CellId;

/// Why an edge exists between a producer and a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeKind {
    /// The consumer imports this name from the producer.
    Name(String),
    /// An upstream relationship recorded by a previous run. Kept so a
    /// transient parse failure does not drop a cell out of the
    /// dependency order between runs.
    Recorded,
}

/// Per-cell input to graph construction, in snapshot order.
#[derive(Debug, Clone)]
pub struct GraphInput {
    pub id: CellId,
    /// Names the cell exports.
    pub created: Vec<String>,
    /// Names the cell imports from other cells.
    pub consumed: Vec<String>,
    /// Producers observed by the cell's last executed run.
    pub recorded_upstream: Vec<CellId>,
}

impl GraphInput {
    pub fn new(id: CellId) -> Self {
        GraphInput {
            id,
            created: Vec::new(),
            consumed: Vec::new(),
            recorded_upstream: Vec::new(),
        }
    }
}

/// A name exported by more than one cell. The exporting cells are
/// excluded from the execution order entirely; input resolution for that
/// name would be ambiguous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameConflict {
    pub name: String,
    /// Exporters in snapshot order.
    pub cells: Vec<CellId>,
}

/// The dependency graph for one snapshot: adjacency plus a deterministic
/// topological order with conflicting and cyclic cells excluded.
#[derive(Debug)]
pub struct CellGraph {
    graph: DiGraph<CellId, EdgeKind>,
    indices: FxHashMap<CellId, NodeIndex>,
    order: Vec<CellId>,
    conflicts: Vec<NameConflict>,
    cyclic: Vec<CellId>,
    exporters: FxHashMap<String, CellId>,
}

impl CellGraph {
    pub fn build(inputs: &[GraphInput]) -> Self {
        let mut graph = DiGraph::new();
        let mut indices = FxHashMap::default();
        let mut position = FxHashMap::default();
        for (at, input) in inputs.iter().enumerate() {
            let node = graph.add_node(input.id);
            indices.insert(input.id, node);
            position.insert(input.id, at);
        }

        let mut producers: FxHashMap<&str, Vec<CellId>> = FxHashMap::default();
        for input in inputs {
            for name in &input.created {
                producers.entry(name.as_str()).or_default().push(input.id);
            }
        }

        let mut conflicts: Vec<NameConflict> = producers
            .iter()
            .filter(|(_, cells)| cells.len() > 1)
            .map(|(name, cells)| NameConflict {
                name: (*name).to_string(),
                cells: cells.clone(),
            })
            .collect();
        conflicts.sort_by(|a, b| a.name.cmp(&b.name));
        let conflicted_names: FxHashSet<&str> =
            conflicts.iter().map(|c| c.name.as_str()).collect();
        let conflicted_cells: FxHashSet<CellId> = conflicts
            .iter()
            .flat_map(|c| c.cells.iter().copied())
            .collect();

        for input in inputs {
            let consumer = indices[&input.id];
            for name in &input.consumed {
                if conflicted_names.contains(name.as_str()) {
                    continue;
                }
                let Some(cells) = producers.get(name.as_str()) else {
                    continue;
                };
                let producer_id = cells[0];
                // Inputs are resolved from other cells only; a cell
                // reading its own export is not an edge.
                if producer_id == input.id {
                    continue;
                }
                graph.add_edge(indices[&producer_id], consumer, EdgeKind::Name(name.clone()));
            }
            for &up in &input.recorded_upstream {
                if up == input.id {
                    continue;
                }
                // Recorded producers may have left the snapshot since.
                let Some(&producer) = indices.get(&up) else {
                    continue;
                };
                if !graph.contains_edge(producer, consumer) {
                    graph.add_edge(producer, consumer, EdgeKind::Recorded);
                }
            }
        }

        let (order, cyclic) = topological_order(&graph, &indices, &position, &conflicted_cells);

        let exporters = producers
            .into_iter()
            .filter(|(name, _)| !conflicted_names.contains(name))
            .map(|(name, cells)| (name.to_string(), cells[0]))
            .collect();

        CellGraph {
            graph,
            indices,
            order,
            conflicts,
            cyclic,
            exporters,
        }
    }

    /// Cells in execution order. Conflicting and cyclic cells are absent.
    pub fn order(&self) -> &[CellId] {
        &self.order
    }

    pub fn conflicts(&self) -> &[NameConflict] {
        &self.conflicts
    }

    /// Cells excluded from the order because they sit on a dependency
    /// cycle, in snapshot order.
    pub fn cyclic(&self) -> &[CellId] {
        &self.cyclic
    }

    pub fn contains(&self, id: CellId) -> bool {
        self.indices.contains_key(&id)
    }

    /// Distinct producers feeding a cell through any edge kind.
    pub fn producers_of(&self, id: CellId) -> Vec<CellId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Distinct consumers fed by a cell through any edge kind.
    pub fn consumers_of(&self, id: CellId) -> Vec<CellId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// The cell currently exporting a name. `None` when nobody does or
    /// when the name is conflicted.
    pub fn producer_of_name(&self, name: &str) -> Option<CellId> {
        self.exporters.get(name).copied()
    }

    /// Producers connected by a live name edge. This is the upstream set
    /// a run snapshots into its cylinder.
    pub fn name_producers_of(&self, id: CellId) -> Vec<CellId> {
        let Some(&node) = self.indices.get(&id) else {
            return Vec::new();
        };
        let mut seen = FxHashSet::default();
        let mut out: Vec<CellId> = self
            .graph
            .edges_directed(node, Direction::Incoming)
            .filter(|edge| matches!(edge.weight(), EdgeKind::Name(_)))
            .map(|edge| self.graph[edge.source()])
            .filter(|cell| seen.insert(*cell))
            .collect();
        out.sort_unstable();
        out
    }

    fn neighbors(&self, id: CellId, direction: Direction) -> Vec<CellId> {
        let Some(&node) = self.indices.get(&id) else {
            return Vec::new();
        };
        let mut seen = FxHashSet::default();
        let mut out: Vec<CellId> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n])
            .filter(|cell| seen.insert(*cell))
            .collect();
        out.sort_unstable();
        out
    }
}

/// Kahn's algorithm over the non-conflicting cells, ties broken by
/// snapshot position so identical snapshots always order identically.
/// Cells never reaching in-degree zero are on a cycle.
fn topological_order(
    graph: &DiGraph<CellId, EdgeKind>,
    indices: &FxHashMap<CellId, NodeIndex>,
    position: &FxHashMap<CellId, usize>,
    excluded: &FxHashSet<CellId>,
) -> (Vec<CellId>, Vec<CellId>) {
    let active: FxHashSet<CellId> = indices
        .keys()
        .copied()
        .filter(|id| !excluded.contains(id))
        .collect();

    let distinct_neighbors = |id: CellId, direction: Direction| -> Vec<CellId> {
        let mut seen = FxHashSet::default();
        graph
            .neighbors_directed(indices[&id], direction)
            .map(|n| graph[n])
            .filter(|cell| active.contains(cell) && seen.insert(*cell))
            .collect()
    };

    let mut indegree: FxHashMap<CellId, usize> = FxHashMap::default();
    for &id in &active {
        indegree.insert(id, distinct_neighbors(id, Direction::Incoming).len());
    }

    let mut ready: BinaryHeap<Reverse<(usize, CellId)>> = indegree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| Reverse((position[id], *id)))
        .collect();

    let mut order = Vec::with_capacity(active.len());
    while let Some(Reverse((_, id))) = ready.pop() {
        order.push(id);
        for consumer in distinct_neighbors(id, Direction::Outgoing) {
            let Some(deg) = indegree.get_mut(&consumer) else {
                continue;
            };
            *deg -= 1;
            if *deg == 0 {
                ready.push(Reverse((position[&consumer], consumer)));
            }
        }
    }

    let ordered: FxHashSet<CellId> = order.iter().copied().collect();
    let mut cyclic: Vec<CellId> = active
        .iter()
        .copied()
        .filter(|id| !ordered.contains(id))
        .collect();
    cyclic.sort_unstable_by_key(|id| position[id]);

    (order, cyclic)
}
