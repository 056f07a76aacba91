//! Automation execution engine for scriptbus
//!
//! Wires user scripts to their event sources and capability surface:
//! - [`runner::AutomationRuntime`] — load/unload/reload lifecycle and
//!   dispatch of bus messages and cron ticks to script handlers
//! - [`context::ScriptContext`] — the per-invocation capability object
//! - [`validator`] — side-effect-free pre-deployment validation
//! - [`watcher::ScriptWatcher`] — filesystem-driven hot reload
//! - [`scheduler`] — 5-field cron jobs

pub mod context;
pub mod error;
pub mod runner;
pub mod scheduler;
pub mod script;
pub mod validator;
pub mod watcher;

pub use context::ScriptContext;
pub use error::RuntimeError;
pub use runner::{Automation, AutomationRuntime, AutomationStatus};
pub use script::{AutomationConfig, ON_MESSAGE, ON_SCHEDULE};
pub use validator::{validate, ScriptKind, ValidationReport};
pub use watcher::ScriptWatcher;

/// Build the restricted engine with the full `Context` API registered.
///
/// This is the engine the runtime, library manager, and server share; the
/// validator deliberately uses a bare [`sb_script::restricted_engine`]
/// instead.
pub fn runtime_engine() -> rhai::Engine {
    let mut engine = sb_script::restricted_engine();
    context::register_api(&mut engine);
    engine
}
