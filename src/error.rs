use crate::task::TaskId;
use std::fmt;

pub type ScriptResult<T> = Result<T, ScriptError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// A primitive could not locate its target. Nothing was registered.
    #[error("cannot resolve {0}")]
    Resolution(String),
    /// Calling into a fiber or script function failed at the interpreter level.
    #[error("invocation of '{name}' failed: {message}")]
    Invocation { name: String, message: String },
    #[error("task {0} outlived its scheduler")]
    Detached(TaskId),
}

impl ScriptError {
    pub fn resolution(what: impl Into<String>) -> Self {
        ScriptError::Resolution(what.into())
    }

    pub fn invocation(name: impl Into<String>, message: impl fmt::Display) -> Self {
        ScriptError::Invocation { name: name.into(), message: message.to_string() }
    }

    pub fn is_resolution(&self) -> bool {
        matches!(self, ScriptError::Resolution(_))
    }
}

impl From<ScriptError> for Box<rhai::EvalAltResult> {
    fn from(err: ScriptError) -> Self {
        err.to_string().into()
    }
}
