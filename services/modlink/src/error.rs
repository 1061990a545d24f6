//! Error handling for the modlink service
//!
//! One variant per failure category of the polling pipeline. Setup-time
//! variants (`ConfigError`, `ConnectError`, `ExpressionCompileError`) are
//! scoped to a single connection; the rest are raised while polling and go
//! through the poll failure path.

use common::ConfigLoadError;
use modlink_calc::CalcError;
use thiserror::Error;

/// modlink error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModlinkError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Transport could not be established
    #[error("Connect error: {0}")]
    ConnectError(String),

    /// Malformed transform expression, detected at connection setup
    #[error("Expression compile error: {0}")]
    ExpressionCompileError(String),

    /// Transport read failed (I/O, timeout, exception response)
    #[error("Read error: {0}")]
    ReadError(String),

    /// Raw words do not match the declared data type
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Transform expression failed at runtime
    #[error("Expression evaluation error: {0}")]
    ExpressionEvalError(String),

    /// Host bus rejected a delta
    #[error("Emit error: {0}")]
    EmitError(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type alias for modlink
pub type Result<T> = std::result::Result<T, ModlinkError>;

impl ModlinkError {
    pub fn config(msg: impl Into<String>) -> Self {
        ModlinkError::ConfigError(msg.into())
    }

    pub fn connect(msg: impl Into<String>) -> Self {
        ModlinkError::ConnectError(msg.into())
    }

    pub fn compile(msg: impl Into<String>) -> Self {
        ModlinkError::ExpressionCompileError(msg.into())
    }

    pub fn read(msg: impl Into<String>) -> Self {
        ModlinkError::ReadError(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        ModlinkError::DecodeError(msg.into())
    }

    pub fn eval(msg: impl Into<String>) -> Self {
        ModlinkError::ExpressionEvalError(msg.into())
    }

    pub fn emit(msg: impl Into<String>) -> Self {
        ModlinkError::EmitError(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        ModlinkError::IoError(msg.into())
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<CalcError> for ModlinkError {
    fn from(err: CalcError) -> Self {
        match err {
            CalcError::Compile(msg) => ModlinkError::ExpressionCompileError(msg),
            CalcError::Evaluation(msg) | CalcError::Function(msg) => {
                ModlinkError::ExpressionEvalError(msg)
            },
        }
    }
}

impl From<ConfigLoadError> for ModlinkError {
    fn from(err: ConfigLoadError) -> Self {
        ModlinkError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for ModlinkError {
    fn from(err: std::io::Error) -> Self {
        ModlinkError::IoError(err.to_string())
    }
}
