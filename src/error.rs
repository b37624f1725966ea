use crate::value::Value;

use std::io;
use thiserror::Error;

/// Crate-wide error type. The `Lex`/`Parse`/`Resolve` variants are the
/// static stratum (accumulated, exit code 65); `Runtime` unwinds the
/// evaluator (exit code 70). `Return` is not an error at all: it is the
/// non-local-return signal that `LoxFunction::call` intercepts, and it
/// must never reach a diagnostic printer.
#[derive(Debug, Error)]
pub enum LoxError {
    #[error("[Line {line}] Error: {message}")]
    Lex { line: usize, message: String },

    #[error("[Line {line}] Error at {location}: {message}")]
    Parse {
        line: usize,
        location: String,
        message: String,
    },

    #[error("[Line {line}] Error at {location}: {message}")]
    Resolve {
        line: usize,
        location: String,
        message: String,
    },

    #[error("[line {line}] Runtime Error: {message}")]
    Runtime { line: usize, message: String },

    #[error("return")]
    Return(Value),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl LoxError {
    pub fn lex(line: usize, message: impl Into<String>) -> Self {
        LoxError::Lex {
            line,
            message: message.into(),
        }
    }

    pub fn parse(token: &crate::token::Token, message: impl Into<String>) -> Self {
        LoxError::Parse {
            line: token.line,
            location: token.location(),
            message: message.into(),
        }
    }

    pub fn resolve(token: &crate::token::Token, message: impl Into<String>) -> Self {
        LoxError::Resolve {
            line: token.line,
            location: token.location(),
            message: message.into(),
        }
    }

    pub fn runtime(line: usize, message: impl Into<String>) -> Self {
        LoxError::Runtime {
            line,
            message: message.into(),
        }
    }

    /// True for the static stratum that gates evaluation and emission.
    pub fn is_static(&self) -> bool {
        matches!(
            self,
            LoxError::Lex { .. } | LoxError::Parse { .. } | LoxError::Resolve { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LoxError>;
