//! Script error types

use thiserror::Error;

/// Errors surfaced while compiling or running a script.
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    /// The script failed to parse.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// The script compiled but failed while evaluating.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl From<rhai::ParseError> for ScriptError {
    fn from(err: rhai::ParseError) -> Self {
        ScriptError::Syntax(err.to_string())
    }
}

impl From<Box<rhai::EvalAltResult>> for ScriptError {
    fn from(err: Box<rhai::EvalAltResult>) -> Self {
        ScriptError::Runtime(err.to_string())
    }
}
