//! The execution scheduler.
//!
//! [`Engine`] holds one [`Cylinder`] per cell and converges the runtime
//! state to whatever [`Notebook`] snapshot the caller hands it: stale
//! cells re-run in dependency order, deleted cells are torn down after
//! their cleanup resolves, conflicting cells are marked with synthetic
//! throws. One update loop runs at a time; snapshots arriving while the
//! loop is busy are coalesced so only the freshest matters.

mod cylinder;
mod listener;

pub(crate) use cylinder::Cylinder;
pub use cylinder::CylinderState;
pub use listener::{EngineListener, RunTrace};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::RwLock;

use crate::cancel::CancelScope;
use crate::cell::{Cell, CellId, CellKind, Notebook, Tick};
use crate::error::Error;
use crate::graph::{CellGraph, GraphInput};
use crate::parse::{CellParser, ParseCache, ParseOutcome};
use crate::runner::{CellRunner, CellValue, RunOutcome, RunRequest, RunResult};
use crate::schedule::{Resolution, find_pending};

struct EngineState {
    cylinders: FxHashMap<CellId, Cylinder>,
    cache: ParseCache,
    ticks: u64,
}

impl EngineState {
    fn next_tick(&mut self) -> Tick {
        self.ticks += 1;
        Tick(self.ticks)
    }

    fn parse_cell(&mut self, parser: &dyn CellParser, cell: &Cell) -> ParseOutcome {
        match cell.kind {
            CellKind::Code => self.cache.parse(parser, cell.id, &cell.code),
            // Text cells carry no names; the runner decides what running
            // one means.
            CellKind::Text => ParseOutcome::empty(Arc::clone(&cell.code)),
        }
    }
}

/// The reactive execution scheduler.
///
/// Collaborators are injected at construction; the engine itself never
/// interprets cell code. All methods take `&self`, so the engine is
/// shared behind an [`Arc`].
pub struct Engine {
    runner: Arc<dyn CellRunner>,
    parser: Arc<dyn CellParser>,
    listener: Option<Arc<dyn EngineListener>>,
    state: RwLock<EngineState>,
    /// Freshest snapshot waiting for the update loop.
    pending: Mutex<Option<Notebook>>,
    /// Guards against concurrent update loops.
    busy: AtomicBool,
}

impl Engine {
    pub fn new(runner: Arc<dyn CellRunner>, parser: Arc<dyn CellParser>) -> Self {
        Engine {
            runner,
            parser,
            listener: None,
            state: RwLock::new(EngineState {
                cylinders: FxHashMap::default(),
                cache: ParseCache::new(),
                ticks: 0,
            }),
            pending: Mutex::new(None),
            busy: AtomicBool::new(false),
        }
    }

    /// Attaches the observer. Builder style; call before sharing the
    /// engine.
    pub fn with_listener(mut self, listener: Arc<dyn EngineListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Whether an update loop is currently draining snapshots.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    // ==== Snapshot intake ====

    /// Converges the runtime state to the given snapshot.
    ///
    /// If another `update` is already looping, the snapshot is stored as
    /// pending and this call returns immediately; the in-flight loop
    /// picks it up before its next scheduling decision.
    pub async fn update(&self, notebook: Notebook) {
        self.store_pending(notebook);
        loop {
            if self.busy.swap(true, Ordering::AcqRel) {
                return;
            }
            while let Some(snapshot) = self.take_pending() {
                self.run_to_quiescence(snapshot).await;
            }
            self.busy.store(false, Ordering::Release);
            // A snapshot stored between the drain and the release would
            // otherwise be lost; re-claim the loop for it.
            if self.pending_is_empty() {
                return;
            }
        }
    }

    async fn run_to_quiescence(&self, mut snapshot: Notebook) {
        loop {
            if let Some(fresher) = self.take_pending() {
                snapshot = fresher;
            }
            let changed = self.update_once(&snapshot).await;
            if !changed && self.pending_is_empty() {
                return;
            }
        }
    }

    fn pending_slot(&self) -> MutexGuard<'_, Option<Notebook>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store_pending(&self, notebook: Notebook) {
        *self.pending_slot() = Some(notebook);
    }

    fn take_pending(&self) -> Option<Notebook> {
        self.pending_slot().take()
    }

    fn pending_is_empty(&self) -> bool {
        self.pending_slot().is_none()
    }

    // ==== The update step ====

    /// One scheduling decision: resolve staleness, tear down deleted
    /// cells, then run at most one pending cell. Returns whether any
    /// cylinder changed observably.
    async fn update_once(&self, notebook: &Notebook) -> bool {
        let mut changed = false;

        let (resolution, parses, graph) = {
            let mut state = self.state.write().await;

            for cell in notebook.iter() {
                if !state.cylinders.contains_key(&cell.id) {
                    let born = state.next_tick();
                    state.cylinders.insert(cell.id, Cylinder::new(born));
                    changed = true;
                }
            }

            let mut parses: FxHashMap<CellId, ParseOutcome> = FxHashMap::default();
            let mut inputs = Vec::with_capacity(notebook.len());
            for cell in notebook.iter() {
                let outcome = state.parse_cell(self.parser.as_ref(), cell);
                let mut input = GraphInput::new(cell.id);
                if let Some(parsed) = outcome.ok() {
                    input.created = parsed.created.clone();
                    input.consumed = parsed.consumed.clone();
                }
                if let Some(cylinder) = state.cylinders.get(&cell.id) {
                    input.recorded_upstream = cylinder.upstream.clone();
                }
                inputs.push(input);
                parses.insert(cell.id, outcome);
            }

            let graph = CellGraph::build(&inputs);
            let resolution = find_pending(notebook, &graph, &state.cylinders);

            changed |= self.sweep_waiting(&mut state, notebook, &resolution);
            changed |= self.apply_synthetic_throws(&mut state, &resolution);

            (resolution, parses, graph)
        };
        if changed {
            self.notify_change();
        }

        if !resolution.deletions.is_empty() {
            self.tear_down(&resolution.deletions).await;
            changed = true;
        }

        let Some(&candidate) = resolution.pending.first() else {
            return changed;
        };
        let Some(outcome) = parses.get(&candidate) else {
            return changed;
        };

        // A parse failure consumes the scheduling slot without reaching
        // the runner; the recorded upstream set stays untouched.
        if let Some(message) = outcome.err() {
            let honored = notebook.get(candidate).map(|cell| cell.requested_at);
            let mut state = self.state.write().await;
            let tick = state.next_tick();
            if let Some(cylinder) = state.cylinders.get_mut(&candidate) {
                cylinder.fail(tick, CellValue::String(message.to_string()), honored);
            }
            drop(state);
            tracing::debug!(cell = %candidate, "parse failure stored as throw");
            self.notify_change();
            return true;
        }

        let Some(parsed) = outcome.ok().cloned() else {
            return changed;
        };
        let Some(cell) = notebook.get(candidate) else {
            return changed;
        };

        // The previous run's scope must finish cancelling (cleanups
        // included) before the new run may start.
        let previous = {
            let mut state = self.state.write().await;
            state
                .cylinders
                .get_mut(&candidate)
                .and_then(Cylinder::take_scope)
        };
        if let Some(scope) = previous {
            scope.cancel().await;
        }

        let request = {
            let mut state = self.state.write().await;

            // Each consumed name resolves against what the other cylinders
            // actually exported, scanned in snapshot order with the last
            // writer winning. A cylinder may still hold a binding its
            // current code no longer exports; that stale value resolves
            // until the owning cell re-runs. A name nobody ever exported
            // leaves the input absent.
            let mut run_inputs = FxHashMap::default();
            for other in notebook.iter() {
                if other.id == candidate {
                    continue;
                }
                let Some(cylinder) = state.cylinders.get(&other.id) else {
                    continue;
                };
                for name in &parsed.consumed {
                    if let Some(value) = cylinder.variables.get(name) {
                        run_inputs.insert(name.clone(), value.clone());
                    }
                }
            }

            let tick = state.next_tick();
            let Some(cylinder) = state.cylinders.get_mut(&candidate) else {
                return changed;
            };
            let signal = cylinder.begin_run(tick, cell.requested_at);
            RunRequest {
                cell: candidate,
                tick,
                code: Arc::clone(&parsed.body),
                inputs: run_inputs,
                signal,
            }
        };

        let upstream = graph.name_producers_of(candidate);
        let trace = RunTrace {
            tick: request.tick,
            cell: candidate,
            code: Arc::clone(&request.code),
        };
        let started = request.tick;
        self.notify_change();
        self.trace_started(&trace);
        tracing::debug!(cell = %candidate, tick = %started, "run started");

        let outcome = match self.runner.run(request).await {
            Ok(outcome) => outcome,
            Err(error) => RunOutcome::thrown(error.to_string()),
        };

        {
            let mut state = self.state.write().await;
            let done = state.next_tick();
            if let Some(cylinder) = state.cylinders.get_mut(&candidate)
                && cylinder.run_started == started
            {
                cylinder.finish_run(done, outcome.result, outcome.variables, upstream);
            }
        }
        tracing::debug!(cell = %candidate, tick = %started, "run finished");
        self.trace_finished(&trace);
        self.notify_change();
        true
    }

    /// Pending cells wait; everything else does not. Running cells keep
    /// their flag untouched.
    fn sweep_waiting(
        &self,
        state: &mut EngineState,
        notebook: &Notebook,
        resolution: &Resolution,
    ) -> bool {
        let pending: FxHashSet<CellId> = resolution.pending.iter().copied().collect();
        let mut changed = false;
        for cell in notebook.iter() {
            if let Some(cylinder) = state.cylinders.get_mut(&cell.id) {
                if cylinder.running {
                    continue;
                }
                changed |= cylinder.mark_waiting(pending.contains(&cell.id));
            }
        }
        changed
    }

    /// Conflicting and cyclic cells get a synthetic throw. Guarded by the
    /// current result so repeated resolutions reach a fixed point.
    fn apply_synthetic_throws(&self, state: &mut EngineState, resolution: &Resolution) -> bool {
        let mut synthetic: Vec<(CellId, CellValue)> = Vec::new();
        for conflict in &resolution.conflicts {
            let error = Error::DuplicateDefinition {
                name: conflict.name.clone(),
                cells: conflict.cells.clone(),
            };
            let value = error.to_throw_value();
            for &id in &conflict.cells {
                synthetic.push((id, value.clone()));
            }
        }
        for &id in &resolution.cyclic {
            synthetic.push((id, Error::CyclicDependency(id).to_throw_value()));
        }

        let mut changed = false;
        for (id, value) in synthetic {
            let expected = RunResult::throw(value.clone());
            let stale = state
                .cylinders
                .get(&id)
                .is_some_and(|cylinder| cylinder.result.as_ref() != Some(&expected));
            if stale {
                let tick = state.next_tick();
                if let Some(cylinder) = state.cylinders.get_mut(&id) {
                    cylinder.fail(tick, value, None);
                    tracing::warn!(cell = %id, "cell excluded from execution order");
                    changed = true;
                }
            }
        }
        changed
    }

    /// Removes cylinders whose cell left the snapshot, awaiting each
    /// scope's cancellation cleanup first.
    async fn tear_down(&self, deletions: &[CellId]) {
        let scopes: Vec<(CellId, Option<CancelScope>)> = {
            let mut state = self.state.write().await;
            deletions
                .iter()
                .map(|&id| {
                    (
                        id,
                        state.cylinders.get_mut(&id).and_then(Cylinder::take_scope),
                    )
                })
                .collect()
        };
        for (id, scope) in scopes {
            if let Some(scope) = scope {
                scope.cancel().await;
            }
            tracing::debug!(cell = %id, "cylinder torn down");
        }
        let mut state = self.state.write().await;
        for &id in deletions {
            state.cylinders.remove(&id);
            state.cache.evict(id);
        }
        drop(state);
        self.notify_change();
    }

    // ==== Late errors ====

    /// Applies an error that surfaced after its run already settled, as a
    /// best-effort update to the same cylinder's result. Ignored when a
    /// newer run superseded the reporting one or the cell is mid-run.
    /// Returns whether the result was updated.
    pub async fn report_late_error(&self, cell: CellId, tick: Tick, value: CellValue) -> bool {
        let applied = {
            let mut state = self.state.write().await;
            match state.cylinders.get_mut(&cell) {
                Some(cylinder) if !cylinder.running && cylinder.run_started == tick => {
                    cylinder.record_late_throw(value);
                    true
                }
                _ => false,
            }
        };
        if applied {
            self.notify_change();
        } else {
            tracing::debug!(cell = %cell, tick = %tick, "late error ignored");
        }
        applied
    }

    // ==== Observation ====

    pub async fn cylinder(&self, id: CellId) -> Option<CylinderState> {
        self.state.read().await.cylinders.get(&id).map(Cylinder::state)
    }

    /// All cylinders, sorted by cell id.
    pub async fn cylinders(&self) -> Vec<(CellId, CylinderState)> {
        let state = self.state.read().await;
        let mut all: Vec<(CellId, CylinderState)> = state
            .cylinders
            .iter()
            .map(|(id, cylinder)| (*id, cylinder.state()))
            .collect();
        all.sort_unstable_by_key(|(id, _)| *id);
        all
    }

    fn notify_change(&self) {
        if let Some(listener) = &self.listener {
            listener.on_change();
        }
    }

    fn trace_started(&self, trace: &RunTrace) {
        if let Some(listener) = &self.listener {
            listener.on_run_started(trace);
        }
    }

    fn trace_finished(&self, trace: &RunTrace) {
        if let Some(listener) = &self.listener {
            listener.on_run_finished(trace);
        }
    }
}
