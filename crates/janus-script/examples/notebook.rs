//! Runs a small notebook and prints every cell's settled result.
//!
//!     cargo run --example notebook

use std::sync::Arc;

use janus_core::{Cell, CellId, Engine, Notebook, RunResult, RunStamp};
use janus_script::{ScriptParser, ScriptRunner};

#[tokio::main]
async fn main() {
    let engine = Engine::new(Arc::new(ScriptRunner), Arc::new(ScriptParser));

    let cells = vec![
        Cell::code(CellId(0), "radius = 4").requested(RunStamp(1)),
        Cell::code(CellId(1), "pi = 3.14159").requested(RunStamp(1)),
        Cell::code(CellId(2), "area = pi * radius * radius").requested(RunStamp(1)),
        Cell::code(CellId(3), "label = \"area: \"").requested(RunStamp(1)),
        Cell::code(CellId(4), "oops = missing + 1").requested(RunStamp(1)),
    ];
    engine.update(Notebook::new(cells)).await;

    for (id, state) in engine.cylinders().await {
        match state.result {
            Some(RunResult::Return { name, value }) => {
                let name = name.as_deref().unwrap_or("_");
                println!("{id}: {name} = {value}");
            }
            Some(RunResult::Throw { value }) => println!("{id}: threw {value}"),
            None => println!("{id}: never ran"),
        }
    }
}
