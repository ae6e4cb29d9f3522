//! Per-cell runtime records.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::cancel::{CancelScope, CancelSignal};
use crate::cell::{CellId, RunStamp, Tick};
use crate::runner::{CellValue, RunResult};

/// Runtime record tracking one cell's execution state across runs.
///
/// Owned exclusively by the engine and mutated only through the named
/// transitions below, keeping the state machine auditable. Observers get
/// [`CylinderState`] snapshots.
pub(crate) struct Cylinder {
    pub(crate) running: bool,
    pub(crate) waiting: bool,
    pub(crate) result: Option<RunResult>,
    pub(crate) variables: FxHashMap<String, CellValue>,
    /// Producers observed by the last executed run.
    pub(crate) upstream: Vec<CellId>,
    /// The request stamp honored by the last run.
    pub(crate) last_run: RunStamp,
    /// Advanced at run start and again at completion.
    pub(crate) last_internal_run: Tick,
    /// Tick of the most recent run start; guards merging so a superseded
    /// run cannot clobber newer state.
    pub(crate) run_started: Tick,
    /// Cancellation scope of the most recent run. Kept after completion
    /// so the next run or the teardown can cancel lingering resources
    /// (timers, subscriptions) the run left behind.
    pub(crate) cancel: Option<CancelScope>,
}

impl Cylinder {
    /// A cylinder is born at the current tick, so upstream results that
    /// predate the cell joining the notebook do not count as newer than
    /// the cell itself.
    pub(crate) fn new(born: Tick) -> Self {
        Cylinder {
            running: false,
            waiting: false,
            result: None,
            variables: FxHashMap::default(),
            upstream: Vec::new(),
            last_run: RunStamp::NEVER,
            last_internal_run: born,
            run_started: Tick::ZERO,
            cancel: None,
        }
    }

    /// Sets the waiting flag; returns whether it changed.
    pub(crate) fn mark_waiting(&mut self, waiting: bool) -> bool {
        if self.waiting == waiting {
            return false;
        }
        self.waiting = waiting;
        true
    }

    /// Start transition: the run claims a fresh cancellation scope, the
    /// request stamp is honored, and the start tick is recorded.
    pub(crate) fn begin_run(&mut self, tick: Tick, honored: RunStamp) -> CancelSignal {
        self.running = true;
        self.waiting = false;
        self.last_internal_run = tick;
        self.run_started = tick;
        self.last_run = self.last_run.max(honored);
        let scope = CancelScope::new();
        let signal = scope.signal();
        self.cancel = Some(scope);
        signal
    }

    /// Completion transition. Exported variables are kept only for a
    /// return result; a throw leaves downstream inputs absent.
    pub(crate) fn finish_run(
        &mut self,
        done: Tick,
        result: RunResult,
        variables: FxHashMap<String, CellValue>,
        upstream: Vec<CellId>,
    ) {
        self.variables = if result.is_throw() {
            FxHashMap::default()
        } else {
            variables
        };
        self.result = Some(result);
        self.upstream = upstream;
        self.running = false;
        self.last_internal_run = done;
    }

    /// Failure without execution (parse error, duplicate definition,
    /// cycle): stores the synthetic throw and clears exports. `honor`
    /// marks the request satisfied for failures that consumed a
    /// scheduling slot.
    pub(crate) fn fail(&mut self, done: Tick, value: CellValue, honor: Option<RunStamp>) {
        self.result = Some(RunResult::throw(value));
        self.variables.clear();
        self.running = false;
        self.waiting = false;
        self.last_internal_run = done;
        if let Some(stamp) = honor {
            self.last_run = self.last_run.max(stamp);
        }
    }

    /// Best-effort result overwrite for an error that surfaced after the
    /// run settled. Touches nothing else: no tick advance, no cascade.
    pub(crate) fn record_late_throw(&mut self, value: CellValue) {
        self.result = Some(RunResult::throw(value));
    }

    pub(crate) fn take_scope(&mut self) -> Option<CancelScope> {
        self.cancel.take()
    }

    /// Read-only snapshot for observers.
    pub(crate) fn state(&self) -> CylinderState {
        CylinderState {
            running: self.running,
            waiting: self.waiting,
            result: self.result.clone(),
            variables: self.variables.clone(),
            upstream: self.upstream.clone(),
            last_run: self.last_run,
            last_internal_run: self.last_internal_run,
        }
    }
}

/// Observable snapshot of one cylinder, serializable for any frontend
/// protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CylinderState {
    pub running: bool,
    pub waiting: bool,
    pub result: Option<RunResult>,
    pub variables: FxHashMap<String, CellValue>,
    pub upstream: Vec<CellId>,
    pub last_run: RunStamp,
    pub last_internal_run: Tick,
}
