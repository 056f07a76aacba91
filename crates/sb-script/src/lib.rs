//! Sandboxed script engine for scriptbus
//!
//! Automations and library modules run in a deliberately restricted rhai
//! engine. The restrictions are the safety boundary: scripts get no imports,
//! no `eval`, bounded operations, bounded call depth, and bounded value
//! sizes, so the only reachable side effects are the ones the injected
//! `Context` object exposes.

mod convert;
mod engine;
mod error;

/// File extension shared by automation scripts and library modules.
pub const SCRIPT_EXTENSION: &str = "rhai";

pub use convert::{dynamic_to_json, json_to_dynamic};
pub use engine::restricted_engine;
pub use error::ScriptError;
