//! Script execution against a resolved input environment.
//!
//! [`ScriptRunner`] evaluates the statements of a cell body in order.
//! The environment starts as the request's resolved inputs; assignments
//! extend it, and the names the cell itself assigned are reported back
//! as its exports. The cell's result is the value of the last statement,
//! tagged with its binding when it was an assignment.
//!
//! `fail(v)` raises `v` as the cell's throw value. `sleep(ms)` suspends
//! and races the run's cancellation signal, so an aborted cell never
//! sleeps out its timer.

use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use janus_core::{CancelSignal, CellRunner, CellValue, Error, RunOutcome, RunRequest};
use rustc_hash::FxHashMap;

use crate::parse::{BinOp, Expr, Stmt, parse_program};

/// Why evaluation stopped early.
enum Interrupt {
    /// `fail(..)` or a runtime type error; becomes the cell's throw.
    Thrown(CellValue),
    Aborted,
}

type Eval = std::result::Result<CellValue, Interrupt>;

fn thrown(message: impl Into<String>) -> Interrupt {
    Interrupt::Thrown(CellValue::String(message.into()))
}

struct Evaluator<'a> {
    env: &'a FxHashMap<String, CellValue>,
    signal: &'a CancelSignal,
}

impl Evaluator<'_> {
    fn eval<'e>(&'e self, expr: &'e Expr) -> BoxFuture<'e, Eval> {
        async move {
            match expr {
                Expr::Int(v) => Ok(CellValue::from(*v)),
                Expr::Float(v) => Ok(CellValue::from(*v)),
                Expr::Str(s) => Ok(CellValue::String(s.clone())),
                Expr::Bool(b) => Ok(CellValue::Bool(*b)),
                Expr::Null => Ok(CellValue::Null),
                Expr::Ident(name) => self
                    .env
                    .get(name)
                    .cloned()
                    .ok_or_else(|| thrown(format!("{name} is not defined"))),
                Expr::Neg(inner) => negate(self.eval(inner).await?),
                Expr::Binary { op, lhs, rhs } => {
                    let lhs = self.eval(lhs).await?;
                    let rhs = self.eval(rhs).await?;
                    binary(*op, lhs, rhs)
                }
                Expr::Call { name, args } => {
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval(arg).await?);
                    }
                    self.call(name, values).await
                }
            }
        }
        .boxed()
    }

    async fn call(&self, name: &str, mut args: Vec<CellValue>) -> Eval {
        match name {
            "sleep" => {
                let ms = args
                    .first()
                    .and_then(CellValue::as_f64)
                    .ok_or_else(|| thrown("sleep expects a duration in milliseconds"))?;
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms.max(0.0) as u64)) => {
                        Ok(CellValue::Null)
                    }
                    _ = self.signal.cancelled() => Err(Interrupt::Aborted),
                }
            }
            "fail" => Err(Interrupt::Thrown(
                args.drain(..).next().unwrap_or(CellValue::Null),
            )),
            "len" => match args.first() {
                Some(CellValue::String(s)) => Ok(CellValue::from(s.chars().count() as i64)),
                Some(CellValue::Array(items)) => Ok(CellValue::from(items.len() as i64)),
                _ => Err(thrown("len expects a string or array")),
            },
            // Unreachable through the parser, which rejects unknown calls.
            other => Err(thrown(format!("{other} is not a function"))),
        }
    }
}

fn negate(value: CellValue) -> Eval {
    if let Some(v) = value.as_i64() {
        return Ok(CellValue::from(-v));
    }
    if let Some(v) = value.as_f64() {
        return Ok(CellValue::from(-v));
    }
    Err(thrown(format!("cannot negate {value}")))
}

fn binary(op: BinOp, lhs: CellValue, rhs: CellValue) -> Eval {
    if op == BinOp::Add
        && let (CellValue::String(l), CellValue::String(r)) = (&lhs, &rhs)
    {
        return Ok(CellValue::String(format!("{l}{r}")));
    }

    // Integer arithmetic stays exact; division and mixed operands go
    // through floats.
    if let (Some(l), Some(r)) = (lhs.as_i64(), rhs.as_i64())
        && op != BinOp::Div
    {
        let result = match op {
            BinOp::Add => l.checked_add(r),
            BinOp::Sub => l.checked_sub(r),
            BinOp::Mul => l.checked_mul(r),
            BinOp::Div => unreachable!(),
        };
        return result
            .map(CellValue::from)
            .ok_or_else(|| thrown("integer overflow"));
    }

    let (Some(l), Some(r)) = (lhs.as_f64(), rhs.as_f64()) else {
        return Err(thrown(format!("cannot combine {lhs} and {rhs}")));
    };
    let result = match op {
        BinOp::Add => l + r,
        BinOp::Sub => l - r,
        BinOp::Mul => l * r,
        BinOp::Div => {
            if r == 0.0 {
                return Err(thrown("division by zero"));
            }
            l / r
        }
    };
    Ok(CellValue::from(result))
}

/// Executes script cells in-process.
pub struct ScriptRunner;

impl ScriptRunner {
    async fn run_program(
        program: Vec<Stmt>,
        mut env: FxHashMap<String, CellValue>,
        signal: CancelSignal,
    ) -> janus_core::Result<RunOutcome> {
        let mut exported: Vec<String> = Vec::new();
        let mut last_value = CellValue::Null;
        let mut last_name: Option<String> = None;

        for stmt in &program {
            if signal.is_cancelled() {
                return Err(Error::Aborted);
            }
            let evaluator = Evaluator {
                env: &env,
                signal: &signal,
            };
            let value = match evaluator.eval(&stmt.expr).await {
                Ok(value) => value,
                Err(Interrupt::Thrown(value)) => return Ok(RunOutcome::thrown(value)),
                Err(Interrupt::Aborted) => return Err(Error::Aborted),
            };
            last_value = value.clone();
            last_name = stmt.name.clone();
            if let Some(name) = &stmt.name {
                if !exported.iter().any(|e| e == name) {
                    exported.push(name.clone());
                }
                env.insert(name.clone(), value);
            }
        }

        let mut outcome = RunOutcome::returned(last_name, last_value);
        for name in exported {
            let value = env.remove(&name).unwrap_or(CellValue::Null);
            outcome = outcome.with_variable(name, value);
        }
        Ok(outcome)
    }
}

impl CellRunner for ScriptRunner {
    fn run(&self, request: RunRequest) -> BoxFuture<'_, janus_core::Result<RunOutcome>> {
        async move {
            tracing::debug!(cell = %request.cell, "script run");
            let program = parse_program(&request.code)
                .map_err(|error| Error::Parse(error.to_string()))?;
            Self::run_program(program, request.inputs, request.signal).await
        }
        .boxed()
    }
}
