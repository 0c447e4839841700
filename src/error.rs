use std::path::PathBuf;

use thiserror::Error;

use crate::token::{Kind, Token};

/// Top-level error for a batch run. The first one raised stops the batch.
#[derive(Debug, Error)]
pub enum CalcError {
    #[error("LexicalError: {0}")]
    Lexical(SyntaxError),
    #[error("SyntaxError: {0}")]
    Syntax(SyntaxError),
    #[error("EvaluationError: {0}")]
    Evaluation(#[from] EvalError),
    #[error("StoreError: {0}")]
    Store(#[from] StoreError),
}

impl From<SyntaxError> for CalcError {
    fn from(err: SyntaxError) -> Self {
        if err.kind == Kind::Unknown {
            CalcError::Lexical(err)
        } else {
            CalcError::Syntax(err)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} (found {found:?} at line {line})")]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
    pub found: String,
    pub kind: Kind,
}

impl SyntaxError {
    pub fn from_token(token: &Token, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: token.line,
            found: token.value.clone(),
            kind: token.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("variable {0} is not defined")]
    UndefinedVariable(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    Overflow,
    #[error("expression nested too deeply")]
    TooDeep,
    #[error("unexpected token {0:?}")]
    UnexpectedToken(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot access {}: {}", .path.display(), .source)]
    IO {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("stored value for {key:?} is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot encode {key:?}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures of the tree rendering service. Never fatal for a batch.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no evaluated expressions to build a syntax tree from")]
    NothingToRender,
    #[error("unsupported render endpoint {0:?}, expected http://host[:port]/path")]
    Endpoint(String),
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),
    #[error("render service answered with status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("render service could not generate the image")]
    Rejected,
    #[error("render request timed out")]
    Timeout,
}
