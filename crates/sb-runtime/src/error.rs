//! Runtime error types

use std::path::PathBuf;

use sb_script::ScriptError;
use thiserror::Error;

/// Errors raised while loading or managing automations.
///
/// These are load-time failures: they stop one automation from activating
/// and are reported to the caller, but never crash the engine.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Automation ids come from file stems and must be plain names.
    #[error("invalid automation id {0:?}: must not contain path separators")]
    InvalidId(String),

    /// The script file could not be read.
    #[error("failed to read script {path}: {source}")]
    ReadScript {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The script failed to compile or its body failed to evaluate.
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// The script body does not bind a `config` value.
    #[error("script does not define a config map")]
    MissingConfig,

    /// `config` is bound to something other than an object map.
    #[error("config must be a map")]
    ConfigNotMap,

    /// Neither handler is defined.
    #[error("must define on_message or on_schedule")]
    NoHandlers,

    /// The `schedule` expression did not parse as 5-field cron.
    #[error("invalid cron expression {expr:?}: {message}")]
    InvalidSchedule { expr: String, message: String },

    /// Lookup of an automation id that is not loaded.
    #[error("automation not loaded: {0}")]
    NotLoaded(String),
}
