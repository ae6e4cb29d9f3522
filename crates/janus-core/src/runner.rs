//! The execution collaborator contract.
//!
//! Running cell code is the embedder's job: an iframe sandbox, a
//! subprocess, an in-process interpreter. The engine only prepares a
//! [`RunRequest`] (code, resolved inputs, cancellation signal) and merges
//! the returned [`RunOutcome`] back into the cylinder.

use std::sync::Arc;

use futures::future::BoxFuture;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelSignal;
use crate::cell::{CellId, Tick};
use crate::error::Result;

/// Values crossing the execution boundary are opaque JSON-like data; the
/// engine never interprets them.
pub type CellValue = serde_json::Value;

/// The settled outcome of one run, as stored on a cylinder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunResult {
    /// The run completed. `name` is the primary binding the cell
    /// evaluates to, when it has one.
    Return {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        value: CellValue,
    },
    /// The run raised. Runner rejections and engine-synthesized errors
    /// are normalized into this same shape.
    Throw { value: CellValue },
}

impl RunResult {
    /// Builds a throw result from anything value-like.
    pub fn throw(value: impl Into<CellValue>) -> Self {
        RunResult::Throw {
            value: value.into(),
        }
    }

    pub fn is_throw(&self) -> bool {
        matches!(self, RunResult::Throw { .. })
    }

    pub fn value(&self) -> &CellValue {
        match self {
            RunResult::Return { value, .. } | RunResult::Throw { value } => value,
        }
    }
}

/// Everything a completed run reports back.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub result: RunResult,
    /// The cell's exported bindings. Merged into the cylinder only when
    /// the result is a return; ignored on a throw.
    pub variables: FxHashMap<String, CellValue>,
}

impl RunOutcome {
    pub fn returned(name: Option<String>, value: CellValue) -> Self {
        RunOutcome {
            result: RunResult::Return { name, value },
            variables: FxHashMap::default(),
        }
    }

    pub fn thrown(value: impl Into<CellValue>) -> Self {
        RunOutcome {
            result: RunResult::throw(value),
            variables: FxHashMap::default(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: CellValue) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}

/// One execution request. Owned, so the runner can move it into whatever
/// task or channel it likes.
#[derive(Debug)]
pub struct RunRequest {
    pub cell: CellId,
    /// The tick at which this run started. A runner that observes an
    /// error after settling can report it through
    /// [`Engine::report_late_error`](crate::Engine::report_late_error)
    /// with this tick.
    pub tick: Tick,
    pub code: Arc<str>,
    /// Values resolved from other cells' exports, keyed by consumed name.
    /// Names whose producer failed or does not exist are simply absent.
    pub inputs: FxHashMap<String, CellValue>,
    pub signal: CancelSignal,
}

/// Executes cells. `Err` is equivalent to a rejected run; the engine
/// normalizes it into a throw result.
pub trait CellRunner: Send + Sync {
    fn run(&self, request: RunRequest) -> BoxFuture<'_, Result<RunOutcome>>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_result_serialization_shape() {
        let returned = RunResult::Return {
            name: None,
            value: json!(2),
        };
        assert_eq!(
            serde_json::to_value(&returned).unwrap(),
            json!({"type": "return", "value": 2})
        );

        let named = RunResult::Return {
            name: Some("x".into()),
            value: json!(1),
        };
        assert_eq!(
            serde_json::to_value(&named).unwrap(),
            json!({"type": "return", "name": "x", "value": 1})
        );

        let thrown = RunResult::throw("boom");
        assert_eq!(
            serde_json::to_value(&thrown).unwrap(),
            json!({"type": "throw", "value": "boom"})
        );
    }

    #[test]
    fn test_outcome_builders() {
        let outcome = RunOutcome::returned(Some("x".into()), json!(1)).with_variable("x", json!(1));
        assert!(!outcome.result.is_throw());
        assert_eq!(outcome.variables["x"], json!(1));
        assert!(RunOutcome::thrown("nope").result.is_throw());
    }
}
