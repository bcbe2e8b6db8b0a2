//! Parse-time errors. Wraps the core crate's `FatalError` so a lex/parse
//! failure carries the same `file:line` location chain a later compile-time
//! error would.

use circ_core::error::FatalError;

#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

pub type FrontendResult<T> = Result<T, FrontendError>;
