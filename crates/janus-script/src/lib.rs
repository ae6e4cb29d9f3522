//! Reference cell language for the Janus notebook engine.
//!
//! A small expression language, enough to exercise the whole reactive
//! pipeline: assignments export names, free identifiers import them, and
//! the built-ins cover the interesting runtime shapes (`sleep` for
//! long-running async work, `fail` for throws, `len` as a plain
//! function). [`ScriptParser`] and [`ScriptRunner`] plug straight into
//! [`janus_core::Engine`].

pub mod parse;
pub mod run;

pub use parse::{ScriptError, ScriptParser};
pub use run::ScriptRunner;
