use thiserror::Error;

use crate::cell::CellId;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the execution core and its collaborators.
///
/// None of these escape [`Engine::update`](crate::Engine::update): the
/// scheduler renders them into the owning cylinder's throw result and
/// keeps going.
#[derive(Debug, Error)]
pub enum Error {
    /// The injected parser rejected a cell's code.
    #[error("parse error: {0}")]
    Parse(String),

    /// A top-level name is exported by more than one cell.
    #[error("the name `{name}` is defined by {} cells", .cells.len())]
    DuplicateDefinition { name: String, cells: Vec<CellId> },

    /// A cell participates in a dependency cycle.
    #[error("cyclic dependency involving {0}")]
    CyclicDependency(CellId),

    /// A run was cancelled before it produced a result.
    #[error("execution aborted")]
    Aborted,

    /// The runner failed without producing a user-level throw value.
    #[error("execution failed: {0}")]
    Execution(String),
}

impl Error {
    /// Renders this error as a throw value for a cylinder result.
    pub fn to_throw_value(&self) -> serde_json::Value {
        serde_json::Value::String(self.to_string())
    }
}
