//! `User` value/statement payloads for quoting a code fragment so it can be
//! captured, copied, and re-spliced under fresh local variables (§4.7).
//!
//! The primary stage-trigger path (`eval::stage_trigger`) never needs this:
//! a `CirCodeId` formal or return value is just the raw handle of an
//! already-built `Code`, passed straight through the call. This module backs
//! the secondary case, a staging-library helper that wants to embed a
//! quoted fragment as a value inside a larger expression it is building, and
//! later splice a copy of it into the caller's own statement stream with its
//! locals renamed, so two splices of the same quote never alias variables.

use circ_core::arena::Handle;
use circ_core::code::Code;
use circ_core::context::Context;
use circ_core::machine::IKind;
use circ_core::stmt::StmtKind;
use circ_core::value::{Value, ValueKind};
use circ_core::var::Var;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Payload behind a quoted-value `User` value: the captured fragment plus
/// the value it evaluates to, so a value splice recovers both the embedded
/// statements and the result expression without re-deriving either.
pub struct QuotedValue {
    pub code_id: Handle<Code>,
    pub inner_value: Value,
}

/// This staging library's `User` kind IDs for one `Context`. Mirrors
/// `CirStmt_registerUser`/`CirValue_registerUser`: a fresh context gets
/// fresh IDs, so running two contexts in the same process never collides.
pub struct StageKinds {
    value_kind: u32,
}

impl StageKinds {
    pub fn register(ctx: &mut Context) -> Self {
        StageKinds { value_kind: ctx.register_user_value_kind() }
    }

    /// Wrap a captured fragment as a quoted value (a "value splice" source).
    pub fn quote(&self, code_id: Handle<Code>, inner_value: Value) -> Value {
        Value::of_user(self.value_kind, Arc::new(QuotedValue { code_id, inner_value }))
    }

    /// Recover the payload behind a value produced by [`Self::quote`].
    /// `None` if `value` isn't one of ours (a kind-tag mismatch, e.g. a
    /// different staging library's `User` value in the same arena).
    pub fn as_quoted<'a>(&self, value: &'a Value) -> Option<&'a QuotedValue> {
        match value.kind() {
            ValueKind::User(kind, payload) if *kind == self.value_kind => payload.downcast_ref(),
            _ => None,
        }
    }
}

fn rewrite_value(v: &Value, renames: &FxHashMap<Handle<Var>, Handle<Var>>) -> Value {
    match v.kind() {
        ValueKind::Var(var, _) | ValueKind::Mem(var, _) => {
            let renamed = renames.get(var).copied().unwrap_or(*var);
            v.with_var(renamed)
        }
        _ => v.clone(),
    }
}

fn rewrite_opt(v: &Option<Value>, renames: &FxHashMap<Handle<Var>, Handle<Var>>) -> Option<Value> {
    v.as_ref().map(|v| rewrite_value(v, renames))
}

/// Copy every statement reachable from `src` into a fresh block owned by
/// `dst_owner`'s arena, rewriting each copied statement's variable
/// references through `renames`. Variables absent from `renames` (globals,
/// or locals the caller intentionally left shared) pass through unchanged.
///
/// `src` must be an `Expr` block (a "statement splice" never copies a
/// `Cond`'s dangling jump lists, which point at statement identities that
/// belong to the original, not the copy).
pub fn copy_code_with_subst(
    ctx: &mut Context,
    src: Handle<Code>,
    renames: &FxHashMap<Handle<Var>, Handle<Var>>,
) -> Handle<Code> {
    debug_assert!(ctx.code.get(src).is_expr(), "statement splice source must be an Expr block");

    let value = ctx.code.get(src).value().cloned().unwrap_or(Value::of_i64(IKind::Int, 0));
    let dst = ctx.code.of_expr(rewrite_value(&value, renames));

    let mut cur = ctx.code.get(src).first;
    while cur.is_some() {
        let kind = ctx.stmt(cur).kind.clone();
        let rewritten = match kind {
            StmtKind::UnOp { dst: d, op, operand } => {
                StmtKind::UnOp { dst: rewrite_value(&d, renames), op, operand: rewrite_value(&operand, renames) }
            }
            StmtKind::BinOp { dst: d, op, lhs, rhs } => StmtKind::BinOp {
                dst: rewrite_value(&d, renames),
                op,
                lhs: rewrite_value(&lhs, renames),
                rhs: rewrite_value(&rhs, renames),
            },
            StmtKind::Call { dst: d, target, args } => StmtKind::Call {
                dst: rewrite_value(&d, renames),
                target: rewrite_value(&target, renames),
                args: args.iter().map(|a| rewrite_value(a, renames)).collect::<Vec<_>>().into(),
            },
            StmtKind::Return { value } => StmtKind::Return { value: rewrite_opt(&value, renames) },
            // Jumps/labels never appear in an Expr block's statement list.
            other => other,
        };
        let sid = ctx.code.append_new_stmt(dst);
        ctx.stmts_mut().get_mut(sid).kind = rewritten;
        cur = ctx.stmt(cur).next;
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use circ_core::machine::Machine;

    #[test]
    fn quote_roundtrips_through_value() {
        let mut ctx = Context::new(Machine::build());
        let kinds = StageKinds::register(&mut ctx);
        let fragment = ctx.code.of_expr(Value::of_i64(IKind::Int, 7));
        let quoted = kinds.quote(fragment, Value::of_i64(IKind::Int, 7));
        let payload = kinds.as_quoted(&quoted).expect("quoted value");
        assert_eq!(payload.code_id, fragment);
        assert_eq!(payload.inner_value.get_i64(), 7);
    }

    #[test]
    fn splice_renames_locals_and_leaves_globals() {
        let mut ctx = Context::new(Machine::build());
        let owner = ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
        let local = ctx.new_var(owner);
        let global = ctx.vars.push(Var::new(Handle::NONE));

        let src = ctx.code.of_expr(Value::of_var(local));
        let sid = ctx.code.append_new_stmt(src);
        ctx.stmts_mut().get_mut(sid).kind = StmtKind::BinOp {
            dst: Value::of_var(local),
            op: circ_core::op::BinOp::Plus,
            lhs: Value::of_var(local),
            rhs: Value::of_var(global),
        };

        let fresh_local = ctx.new_var(owner);
        let renames: FxHashMap<_, _> = [(local, fresh_local)].into_iter().collect();
        let copy = copy_code_with_subst(&mut ctx, src, &renames);

        assert_eq!(ctx.code.get(copy).value().unwrap().get_var(), fresh_local);
        let copied_sid = ctx.code.get(copy).first;
        match &ctx.stmt(copied_sid).kind {
            StmtKind::BinOp { dst, lhs, rhs, .. } => {
                assert_eq!(dst.get_var(), fresh_local);
                assert_eq!(lhs.get_var(), fresh_local);
                assert_eq!(rhs.get_var(), global);
            }
            _ => panic!("expected BinOp"),
        }
    }
}
