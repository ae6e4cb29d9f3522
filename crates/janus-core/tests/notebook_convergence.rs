//! Integration tests for notebook convergence.
//!
//! Drives the engine with a tiny assignment language (`name = term + term`)
//! and checks run ordering, cascading, conflict handling, and error
//! isolation across full update cycles.

use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::BoxFuture;
use rustc_hash::FxHashMap;
use serde_json::json;

use janus_core::{
    Cell, CellId, CellParser, CellRunner, CellValue, Engine, EngineListener, Notebook, ParsedCell,
    RunOutcome, RunRequest, RunResult, RunStamp, RunTrace, Tick,
};

// =============================================================================
// Test Doubles
// =============================================================================

/// Parses `name = expr`, treating every alphabetic token on the right as
/// a consumed name.
struct AssignmentParser;

impl CellParser for AssignmentParser {
    fn parse(&self, code: &str) -> janus_core::Result<ParsedCell> {
        let Some((name, expr)) = code.split_once('=') else {
            return Err(janus_core::Error::Parse(format!(
                "expected `name = expr`, got `{code}`"
            )));
        };
        let name = name.trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(janus_core::Error::Parse(format!("bad name `{name}`")));
        }
        let mut consumed: Vec<String> = Vec::new();
        for term in expr.split(|c: char| !c.is_ascii_alphanumeric() && c != '_') {
            if term.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
                && !consumed.iter().any(|seen| seen == term)
            {
                consumed.push(term.to_string());
            }
        }
        Ok(ParsedCell {
            consumed,
            created: vec![name.to_string()],
            body: code.into(),
        })
    }
}

/// Evaluates assignment bodies by summing integer literals and resolved
/// inputs. An unresolved identifier throws, which doubles as the failure
/// mechanism for tests.
#[derive(Default)]
struct ArithmeticRunner {
    log: Mutex<Vec<String>>,
    ticks: Mutex<FxHashMap<CellId, Tick>>,
}

impl ArithmeticRunner {
    fn runs(&self) -> Vec<String> {
        self.log.lock().expect("run log poisoned").clone()
    }

    fn tick_of(&self, cell: CellId) -> Tick {
        self.ticks.lock().expect("tick log poisoned")[&cell]
    }
}

impl CellRunner for ArithmeticRunner {
    fn run(&self, request: RunRequest) -> BoxFuture<'_, janus_core::Result<RunOutcome>> {
        async move {
            self.log
                .lock()
                .expect("run log poisoned")
                .push(request.code.to_string());
            self.ticks
                .lock()
                .expect("tick log poisoned")
                .insert(request.cell, request.tick);

            let Some((name, expr)) = request.code.split_once('=') else {
                return Ok(RunOutcome::thrown("not an assignment"));
            };
            let mut total = 0i64;
            for term in expr.split('+') {
                let term = term.trim();
                if let Ok(literal) = term.parse::<i64>() {
                    total += literal;
                    continue;
                }
                match request.inputs.get(term).and_then(CellValue::as_i64) {
                    Some(value) => total += value,
                    None => {
                        return Ok(RunOutcome::thrown(format!("{term} is not defined")));
                    }
                }
            }
            let name = name.trim().to_string();
            let value = CellValue::from(total);
            Ok(RunOutcome::returned(Some(name.clone()), value.clone()).with_variable(name, value))
        }
        .boxed()
    }
}

/// Records listener callbacks as strings for ordering assertions.
#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    fn events(&self) -> Vec<String> {
        self.events.lock().expect("event log poisoned").clone()
    }
}

impl EngineListener for RecordingListener {
    fn on_run_started(&self, trace: &RunTrace) {
        self.events
            .lock()
            .expect("event log poisoned")
            .push(format!("start {}", trace.code));
    }

    fn on_run_finished(&self, trace: &RunTrace) {
        self.events
            .lock()
            .expect("event log poisoned")
            .push(format!("finish {}", trace.code));
    }
}

// =============================================================================
// Test Helpers
// =============================================================================

struct Harness {
    engine: Engine,
    runner: Arc<ArithmeticRunner>,
}

impl Harness {
    fn new() -> Self {
        let runner = Arc::new(ArithmeticRunner::default());
        let engine = Engine::new(runner.clone(), Arc::new(AssignmentParser));
        Harness { engine, runner }
    }

    async fn result_of(&self, id: usize) -> RunResult {
        self.engine
            .cylinder(CellId(id))
            .await
            .expect("cylinder exists")
            .result
            .expect("cell has settled")
    }

    async fn variable(&self, id: usize, name: &str) -> CellValue {
        self.engine
            .cylinder(CellId(id))
            .await
            .expect("cylinder exists")
            .variables[name]
            .clone()
    }
}

fn cell(id: usize, code: &str, stamp: i64) -> Cell {
    Cell::code(CellId(id), code).requested(RunStamp(stamp))
}

fn throw_message(result: &RunResult) -> &str {
    assert!(result.is_throw(), "expected a throw, got {result:?}");
    result.value().as_str().expect("throw carries a message")
}

// =============================================================================
// Convergence
// =============================================================================

#[tokio::test]
async fn test_single_cell_runs_on_request() {
    let h = Harness::new();
    h.engine
        .update(Notebook::new(vec![cell(0, "x = 1", 1)]))
        .await;

    assert_eq!(h.runner.runs(), vec!["x = 1"]);
    assert_eq!(h.variable(0, "x").await, json!(1));
    match h.result_of(0).await {
        RunResult::Return { name, value } => {
            assert_eq!(name.as_deref(), Some("x"));
            assert_eq!(value, json!(1));
        }
        other => panic!("expected return, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unrequested_cell_stays_idle() {
    let h = Harness::new();
    h.engine
        .update(Notebook::new(vec![Cell::code(CellId(0), "x = 1")]))
        .await;

    assert!(h.runner.runs().is_empty());
    let state = h.engine.cylinder(CellId(0)).await.expect("cylinder exists");
    assert!(state.result.is_none());
    assert!(!state.waiting);
}

#[tokio::test]
async fn test_chain_runs_in_dependency_order() {
    let h = Harness::new();
    // Snapshot order deliberately disagrees with dependency order.
    h.engine
        .update(Notebook::new(vec![
            cell(2, "z = x + y", 1),
            cell(0, "x = 1", 1),
            cell(1, "y = x + 1", 1),
        ]))
        .await;

    assert_eq!(h.runner.runs(), vec!["x = 1", "y = x + 1", "z = x + y"]);
    assert_eq!(h.variable(0, "x").await, json!(1));
    assert_eq!(h.variable(1, "y").await, json!(2));
    assert_eq!(h.variable(2, "z").await, json!(3));
}

#[tokio::test]
async fn test_edit_cascades_to_consumers() {
    let h = Harness::new();
    h.engine
        .update(Notebook::new(vec![
            cell(0, "x = 1", 1),
            cell(1, "y = x + 1", 1),
        ]))
        .await;
    assert_eq!(h.variable(1, "y").await, json!(2));

    // Only the producer is re-requested; the consumer re-runs anyway.
    h.engine
        .update(Notebook::new(vec![
            cell(0, "x = 5", 2),
            cell(1, "y = x + 1", 1),
        ]))
        .await;

    assert_eq!(
        h.runner.runs(),
        vec!["x = 1", "y = x + 1", "x = 5", "y = x + 1"]
    );
    assert_eq!(h.variable(0, "x").await, json!(5));
    assert_eq!(h.variable(1, "y").await, json!(6));
}

#[tokio::test]
async fn test_unrelated_cells_do_not_rerun() {
    let h = Harness::new();
    h.engine
        .update(Notebook::new(vec![
            cell(0, "x = 1", 1),
            cell(1, "standalone = 10", 1),
        ]))
        .await;

    h.engine
        .update(Notebook::new(vec![
            cell(0, "x = 2", 2),
            cell(1, "standalone = 10", 1),
        ]))
        .await;

    assert_eq!(h.runner.runs(), vec!["x = 1", "standalone = 10", "x = 2"]);
}

#[tokio::test]
async fn test_rerun_of_same_code_on_request() {
    let h = Harness::new();
    h.engine
        .update(Notebook::new(vec![cell(0, "x = 1", 1)]))
        .await;
    h.engine
        .update(Notebook::new(vec![cell(0, "x = 1", 2)]))
        .await;

    // Same code, fresh request: the cell runs again.
    assert_eq!(h.runner.runs(), vec!["x = 1", "x = 1"]);
}

// =============================================================================
// Conflicts and Cycles
// =============================================================================

#[tokio::test]
async fn test_duplicate_definition_throws_both_cells() {
    let h = Harness::new();
    h.engine
        .update(Notebook::new(vec![
            cell(0, "x = 1", 1),
            cell(1, "x = 2", 1),
            cell(2, "y = x + 1", 1),
        ]))
        .await;

    // Neither conflicting cell reaches the runner.
    assert_eq!(h.runner.runs(), vec!["y = x + 1"]);
    for id in [0, 1] {
        let result = h.result_of(id).await;
        assert!(throw_message(&result).contains("defined by 2 cells"));
    }
    // The consumer ran but saw no `x`.
    let result = h.result_of(2).await;
    assert_eq!(throw_message(&result), "x is not defined");
}

#[tokio::test]
async fn test_conflict_resolution_reruns_both_sides() {
    let h = Harness::new();
    h.engine
        .update(Notebook::new(vec![
            cell(0, "x = 1", 1),
            cell(1, "x = 2", 1),
        ]))
        .await;
    assert!(h.runner.runs().is_empty());

    // Renaming one export clears the conflict; the untouched cell still
    // holds an unhonored request and re-runs on its own.
    h.engine
        .update(Notebook::new(vec![
            cell(0, "x = 1", 1),
            cell(1, "w = 2", 2),
        ]))
        .await;

    assert_eq!(h.runner.runs(), vec!["x = 1", "w = 2"]);
    assert_eq!(h.variable(0, "x").await, json!(1));
    assert_eq!(h.variable(1, "w").await, json!(2));
}

#[tokio::test]
async fn test_cycle_members_throw_and_bystanders_run() {
    let h = Harness::new();
    h.engine
        .update(Notebook::new(vec![
            cell(0, "a = b + 1", 1),
            cell(1, "b = a + 1", 1),
            cell(2, "c = 7", 1),
        ]))
        .await;

    assert_eq!(h.runner.runs(), vec!["c = 7"]);
    for id in [0, 1] {
        let result = h.result_of(id).await;
        assert!(throw_message(&result).contains("cyclic dependency"));
    }
    assert_eq!(h.variable(2, "c").await, json!(7));
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failure_leaves_consumer_inputs_absent() {
    let h = Harness::new();
    h.engine
        .update(Notebook::new(vec![
            cell(0, "x = nonexistent", 1),
            cell(1, "y = x + 1", 1),
        ]))
        .await;

    // Both cells ran; the producer's throw left `x` unexported.
    assert_eq!(h.runner.runs(), vec!["x = nonexistent", "y = x + 1"]);
    let result = h.result_of(0).await;
    assert_eq!(throw_message(&result), "nonexistent is not defined");
    let result = h.result_of(1).await;
    assert_eq!(throw_message(&result), "x is not defined");

    let state = h.engine.cylinder(CellId(0)).await.expect("cylinder exists");
    assert!(state.variables.is_empty());
}

#[tokio::test]
async fn test_fixing_a_failure_heals_downstream() {
    let h = Harness::new();
    h.engine
        .update(Notebook::new(vec![
            cell(0, "x = nonexistent", 1),
            cell(1, "y = x + 1", 1),
        ]))
        .await;

    h.engine
        .update(Notebook::new(vec![
            cell(0, "x = 4", 2),
            cell(1, "y = x + 1", 1),
        ]))
        .await;

    assert_eq!(h.variable(0, "x").await, json!(4));
    assert_eq!(h.variable(1, "y").await, json!(5));
}

#[tokio::test]
async fn test_parse_error_becomes_throw_without_running() {
    let h = Harness::new();
    h.engine
        .update(Notebook::new(vec![cell(0, "definitely not assignment", 1)]))
        .await;

    assert!(h.runner.runs().is_empty());
    let result = h.result_of(0).await;
    assert!(throw_message(&result).contains("expected `name = expr`"));
}

#[tokio::test]
async fn test_parse_error_keeps_consumers_ordered() {
    let h = Harness::new();
    h.engine
        .update(Notebook::new(vec![
            cell(0, "x = 1", 1),
            cell(1, "y = x + 1", 1),
        ]))
        .await;
    // Break the consumer's parse, then re-run the producer. The upstream
    // edge recorded by the last good run still pulls the consumer into
    // the cascade, so its internal clock advances.
    h.engine
        .update(Notebook::new(vec![
            cell(0, "x = 1", 1),
            cell(1, "broken !", 2),
        ]))
        .await;
    let settled = h
        .engine
        .cylinder(CellId(1))
        .await
        .expect("cylinder exists")
        .last_internal_run;

    h.engine
        .update(Notebook::new(vec![
            cell(0, "x = 9", 3),
            cell(1, "broken !", 2),
        ]))
        .await;

    let after = h
        .engine
        .cylinder(CellId(1))
        .await
        .expect("cylinder exists")
        .last_internal_run;
    assert!(after > settled);
    let result = h.result_of(1).await;
    assert!(throw_message(&result).contains("expected `name = expr`"));
}

// =============================================================================
// Input Resolution
// =============================================================================

#[tokio::test]
async fn test_stale_export_resolves_until_producer_reruns() {
    let h = Harness::new();
    h.engine
        .update(Notebook::new(vec![
            cell(0, "x = 41", 1),
            cell(1, "b = x + 1", 1),
        ]))
        .await;
    assert_eq!(h.variable(1, "b").await, json!(42));

    // Cell 0 stops exporting `x` but is not re-requested, so its
    // cylinder keeps the old binding; the re-requested consumer still
    // resolves it.
    h.engine
        .update(Notebook::new(vec![
            cell(0, "y = 1", 1),
            cell(1, "b = x + 1", 2),
        ]))
        .await;

    assert_eq!(h.runner.runs(), vec!["x = 41", "b = x + 1", "b = x + 1"]);
    assert_eq!(h.variable(1, "b").await, json!(42));
}

#[tokio::test]
async fn test_latest_exporter_wins_in_snapshot_order() {
    let h = Harness::new();
    h.engine
        .update(Notebook::new(vec![cell(0, "x = 1", 1)]))
        .await;

    // Cell 0 moves on without a new request, leaving its cylinder
    // holding the old `x`; a cell later in the snapshot exports a fresh
    // one. No conflict: only one *current* parse creates `x`.
    h.engine
        .update(Notebook::new(vec![
            cell(0, "y = 9", 1),
            cell(2, "x = 5", 2),
            cell(1, "b = x + 1", 2),
        ]))
        .await;

    assert_eq!(h.variable(2, "x").await, json!(5));
    assert_eq!(h.variable(1, "b").await, json!(6));
}

// =============================================================================
// Late Errors
// =============================================================================

#[tokio::test]
async fn test_late_error_overwrites_matching_run() {
    let h = Harness::new();
    h.engine
        .update(Notebook::new(vec![cell(0, "x = 1", 1)]))
        .await;
    let tick = h.runner.tick_of(CellId(0));

    let applied = h
        .engine
        .report_late_error(CellId(0), tick, json!("device lost"))
        .await;
    assert!(applied);
    let result = h.result_of(0).await;
    assert_eq!(throw_message(&result), "device lost");
}

#[tokio::test]
async fn test_late_error_for_superseded_run_is_ignored() {
    let h = Harness::new();
    h.engine
        .update(Notebook::new(vec![cell(0, "x = 1", 1)]))
        .await;
    let stale = h.runner.tick_of(CellId(0));

    h.engine
        .update(Notebook::new(vec![cell(0, "x = 2", 2)]))
        .await;

    let applied = h
        .engine
        .report_late_error(CellId(0), stale, json!("device lost"))
        .await;
    assert!(!applied);
    match h.result_of(0).await {
        RunResult::Return { value, .. } => assert_eq!(value, json!(2)),
        other => panic!("late error clobbered a newer run: {other:?}"),
    }
}

// =============================================================================
// Observation
// =============================================================================

#[tokio::test]
async fn test_listener_sees_paired_run_traces() {
    let listener = Arc::new(RecordingListener::default());
    let runner = Arc::new(ArithmeticRunner::default());
    let engine =
        Engine::new(runner, Arc::new(AssignmentParser)).with_listener(listener.clone());

    engine
        .update(Notebook::new(vec![
            cell(0, "x = 1", 1),
            cell(1, "y = x + 1", 1),
        ]))
        .await;

    assert_eq!(
        listener.events(),
        vec![
            "start x = 1",
            "finish x = 1",
            "start y = x + 1",
            "finish y = x + 1",
        ]
    );
}

#[tokio::test]
async fn test_cylinders_snapshot_is_sorted() {
    let h = Harness::new();
    h.engine
        .update(Notebook::new(vec![
            cell(3, "c = 1", 1),
            cell(1, "a = 1", 1),
            cell(2, "b = 1", 1),
        ]))
        .await;

    let ids: Vec<CellId> = h
        .engine
        .cylinders()
        .await
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(ids, vec![CellId(1), CellId(2), CellId(3)]);
}
