//! Error kinds per §7: `Bug` (panics), `Fatal` (propagated `Result`), and
//! `Warning` (collected, non-fatal).

use std::fmt;

/// One entry in the include-chain, built from `# <line> "<file>" <flag>`
/// line-marker directives as the lexer pushes/pops them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// The include-chain at the moment of a diagnostic: innermost location last.
#[derive(Debug, Clone, Default)]
pub struct LocationStack(pub Vec<Location>);

impl LocationStack {
    pub fn new() -> Self {
        LocationStack(Vec::new())
    }

    pub fn push(&mut self, file: impl Into<String>, line: u32) {
        self.0.push(Location { file: file.into(), line });
    }

    /// Pop back to (and including) the first frame matching `file`, the
    /// semantics of a `2` line-marker flag (return from an include).
    pub fn pop(&mut self) {
        self.0.pop();
    }

    pub fn current(&self) -> Option<&Location> {
        self.0.last()
    }
}

impl fmt::Display for LocationStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, loc) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "\n  included from ")?;
            }
            write!(f, "{loc}")?;
        }
        Ok(())
    }
}

/// A user-visible miscompile: always carries the location stack at the
/// moment of failure, per §7.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}\n  at {locations}")]
pub struct FatalError {
    pub message: String,
    pub locations: LocationStack,
}

impl FatalError {
    pub fn new(message: impl Into<String>, locations: LocationStack) -> Self {
        FatalError { message: message.into(), locations }
    }
}

/// A non-fatal literal-overflow style diagnostic: printed, never aborts.
#[derive(Debug, Clone, thiserror::Error)]
#[error("warning: {message}\n  at {locations}")]
pub struct WarnError {
    pub message: String,
    pub locations: LocationStack,
}

/// The result type threaded through every core/JIT/staging operation.
pub type CirResult<T> = Result<T, FatalError>;

/// Panics with a formatted message, mirroring `cir_bug`'s "abort with stack
/// trace" semantics. Use for internal invariant violations that a caller
/// should never be able to trigger by feeding bad-but-plausible input.
#[macro_export]
macro_rules! cir_bug {
    ($($arg:tt)*) => {
        panic!("cir: internal invariant violated: {}", format!($($arg)*))
    };
}

/// Build a `Err(FatalError)` at the given location stack.
#[macro_export]
macro_rules! cir_fatal {
    ($locs:expr, $($arg:tt)*) => {
        return Err($crate::error::FatalError::new(format!($($arg)*), $locs.clone()))
    };
}
