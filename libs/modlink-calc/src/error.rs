//! Error types for modlink-calc

use thiserror::Error;

/// Calculation errors
#[derive(Debug, Clone, Error)]
pub enum CalcError {
    /// The expression text could not be parsed
    #[error("Compile error: {0}")]
    Compile(String),

    /// The expression parsed but failed while being evaluated
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Function error: {0}")]
    Function(String),
}

impl CalcError {
    pub fn compile(msg: impl Into<String>) -> Self {
        Self::Compile(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    pub fn function(msg: impl Into<String>) -> Self {
        Self::Function(msg.into())
    }

    /// True for errors raised before any value was evaluated
    pub fn is_compile(&self) -> bool {
        matches!(self, Self::Compile(_))
    }
}

pub type Result<T> = std::result::Result<T, CalcError>;
