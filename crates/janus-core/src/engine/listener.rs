//! Observer hooks for engine state changes and run tracing.

use std::sync::Arc;

use crate::cell::{CellId, Tick};

/// One execution trace entry, emitted before and after each run.
#[derive(Debug, Clone)]
pub struct RunTrace {
    pub tick: Tick,
    pub cell: CellId,
    pub code: Arc<str>,
}

/// Callbacks fired by the engine as cylinders change and runs execute.
/// All methods default to no-ops; implement what you need.
///
/// Callbacks are invoked outside the engine's internal locks, so an
/// implementation may freely queue notifications or query the engine
/// from another task.
pub trait EngineListener: Send + Sync {
    /// Some cylinder's observable state changed (created, waiting,
    /// running, result merged, torn down).
    fn on_change(&self) {}

    /// A run is about to start.
    fn on_run_started(&self, _trace: &RunTrace) {}

    /// A run settled and its outcome was merged.
    fn on_run_finished(&self, _trace: &RunTrace) {}
}
