//! Compile-time staging (§4.7): the `@f(args)` stage-trigger evaluator and
//! the quote/splice payloads a staging-library helper builds on top of it.
//! Built directly on `circ-core`'s arenas/builder and `circ-jit`'s call
//! stub; has no opinion on lexical syntax, which belongs to `circ-frontend`.

pub mod eval;
pub mod quote;

pub use eval::stage_trigger;
pub use quote::{copy_code_with_subst, QuotedValue, StageKinds};
