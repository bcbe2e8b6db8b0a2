//! IR construction (§4.2 "Building expressions and control flow"): the
//! `build_*` entry points a parser calls while walking a C expression or
//! statement tree, each taking whole `Code` blocks (not bare values) so that
//! a short-circuit operand can itself be a `Cond` block.
//!
//! Every `build_*` goes through [`to_expr`] first where it needs a plain
//! value: that's where a `Cond` block's backpatch lists get closed off into
//! a materialized `0`/`1` in a fresh temporary.

use crate::arena::Handle;
use crate::code::Code;
use crate::context::Context;
use crate::machine::IKind;
use crate::op::{BinOp, CondOp, UnOp};
use crate::stmt::StmtKind;
use crate::types::{self, Type, TypeEnv};
use crate::value::Value;
use crate::var::Storage;

/// Demand a plain value out of `code`, consuming it. An `Expr` block is
/// unwrapped as-is; a `Cond` block is materialized by allocating a fresh
/// `int` temp, assigning `1`/`0` on every pending true/false jump, and
/// falling both paths through to a trailing label (§4.3).
pub fn to_expr(ctx: &mut Context, owner: Handle<Code>, code: Handle<Code>) -> Value {
    if ctx.code.get(code).is_expr() {
        return ctx.code.get(code).value().cloned().expect("Expr code always carries a value");
    }

    let tmp = ctx.new_var(owner);
    ctx.vars.get_mut(tmp).ty = Some(Type::int(IKind::Int));
    ctx.vars.get_mut(tmp).storage = Storage::Register;
    let tmp_val = Value::of_var(tmp);

    let truejumps = std::mem::take(&mut ctx.code.get_mut(code).truejumps);
    let falsejumps = std::mem::take(&mut ctx.code.get_mut(code).falsejumps);

    for sid in truejumps {
        let assign = ctx.stmts_mut().new_after(sid);
        *ctx.stmts_mut().get_mut(assign) =
            make_stmt(StmtKind::UnOp { dst: tmp_val.clone(), op: UnOp::Identity, operand: Value::of_i64(IKind::Int, 1) });
        let after_label = ctx.stmts_mut().new_after(assign);
        redirect_jump(ctx, sid, after_label);
    }
    for sid in falsejumps {
        let assign = ctx.stmts_mut().new_after(sid);
        *ctx.stmts_mut().get_mut(assign) =
            make_stmt(StmtKind::UnOp { dst: tmp_val.clone(), op: UnOp::Identity, operand: Value::of_i64(IKind::Int, 0) });
        let after_label = ctx.stmts_mut().new_after(assign);
        redirect_jump(ctx, sid, after_label);
    }

    ctx.code.to_expr_value(code, tmp_val.clone());
    tmp_val
}

fn make_stmt(kind: StmtKind) -> crate::stmt::Stmt {
    crate::stmt::Stmt { kind, owner: Handle::NONE, prev: Handle::NONE, next: Handle::NONE }
}

fn redirect_jump(ctx: &mut Context, jump: Handle<crate::stmt::Stmt>, target: Handle<crate::stmt::Stmt>) {
    ctx.stmts_mut().get_mut(jump).set_jump_target(target);
}

fn int_value(v: &Value) -> Option<i64> {
    v.is_int().then(|| v.get_i64())
}

fn fold_binop(op: BinOp, a: i64, b: i64) -> Option<i64> {
    Some(match op {
        BinOp::Plus => a.wrapping_add(b),
        BinOp::Minus => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return None;
            }
            a.wrapping_div(b)
        }
        BinOp::Mod => {
            if b == 0 {
                return None;
            }
            a.wrapping_rem(b)
        }
        BinOp::ShiftLt => a.wrapping_shl(b as u32),
        BinOp::ShiftRt => a.wrapping_shr(b as u32),
        BinOp::BAnd => a & b,
        BinOp::BXor => a ^ b,
        BinOp::BOr => a | b,
    })
}

/// Build an arithmetic/bitwise binary operator (§4.2 "build_op"): convert
/// both operands to expressions, constant-fold if both are literals,
/// otherwise apply the usual arithmetic conversions and emit one
/// three-address statement into a fresh temp.
pub fn build_binop(ctx: &mut Context, owner: Handle<Code>, op: BinOp, lhs: Handle<Code>, rhs: Handle<Code>) -> Handle<Code> {
    let lv = to_expr(ctx, owner, lhs);
    let rv = to_expr(ctx, owner, rhs);

    if lv.is_ptr_like(ctx) || rv.is_ptr_like(ctx) {
        return build_pointer_arith(ctx, owner, op, lv, rv);
    }

    let lty = value_type(ctx, &lv);
    let rty = value_type(ctx, &rv);
    let result_ty = types::arithmetic_conversion(&lty, &rty, &ctx.machine);

    if let (Some(a), Some(b)) = (int_value(&lv), int_value(&rv)) {
        if let Some(folded) = fold_binop(op, a, b) {
            let k = result_ty.as_int().unwrap_or(IKind::Int);
            return ctx.code.of_expr(Value::of_i64(k, folded));
        }
    }

    let tmp = new_temp(ctx, owner, result_ty.clone());
    emit(ctx, owner, StmtKind::BinOp { dst: tmp.clone(), op, lhs: lv, rhs: rv });
    ctx.code.of_expr(tmp)
}

/// `+`/`-` with a pointer operand: scale the integer side by the pointee
/// size rather than going through arithmetic conversion (§4.2 "pointer
/// arithmetic").
fn build_pointer_arith(ctx: &mut Context, owner: Handle<Code>, op: BinOp, lv: Value, rv: Value) -> Handle<Code> {
    let (ptr_val, int_val, ptr_is_lhs) = if lv.is_ptr_like(ctx) { (lv, rv, true) } else { (rv, lv, false) };
    let elem_ty = value_type(ctx, &ptr_val)
        .base_type()
        .cloned()
        .unwrap_or_else(Type::void);
    let elem_size = ctx.sizeof(&elem_ty).max(1) as i64;

    if int_val.is_ptr_like(ctx) {
        // pointer - pointer: difference in elements.
        let tmp = new_temp(ctx, owner, Type::int(IKind::Long));
        emit(ctx, owner, StmtKind::BinOp { dst: tmp.clone(), op: BinOp::Minus, lhs: ptr_val, rhs: int_val });
        let scaled = new_temp(ctx, owner, Type::int(IKind::Long));
        emit(
            ctx,
            owner,
            StmtKind::BinOp { dst: scaled.clone(), op: BinOp::Div, lhs: tmp, rhs: Value::of_i64(IKind::Long, elem_size) },
        );
        return ctx.code.of_expr(scaled);
    }

    let scale = Value::of_i64(IKind::Long, elem_size);
    let scaled_offset = new_temp(ctx, owner, Type::int(IKind::Long));
    emit(ctx, owner, StmtKind::BinOp { dst: scaled_offset.clone(), op: BinOp::Mul, lhs: int_val, rhs: scale });
    let result_ty = value_type(ctx, &ptr_val);
    let tmp = new_temp(ctx, owner, result_ty);
    let (lhs, rhs) = if ptr_is_lhs { (ptr_val, scaled_offset) } else { (scaled_offset, ptr_val) };
    emit(ctx, owner, StmtKind::BinOp { dst: tmp.clone(), op, lhs, rhs });
    ctx.code.of_expr(tmp)
}

/// `<`/`<=`/`>`/`>=`/`==`/`!=`: always builds a `Cond` block, never an
/// `Expr` — callers that need a plain `0`/`1` go through [`to_expr`] (§4.2).
///
/// Emits the `Cmp` itself (the true-jump, taken when the comparison holds)
/// immediately followed by an unconditional `Goto` (the false-jump, taken
/// on fallthrough) — both backpatched later by whatever control construct
/// closes over this `Cond`.
pub fn build_relop(ctx: &mut Context, owner: Handle<Code>, op: CondOp, lhs: Handle<Code>, rhs: Handle<Code>) -> Handle<Code> {
    let lv = to_expr(ctx, owner, lhs);
    let rv = to_expr(ctx, owner, rhs);
    let code = ctx.code.of_cond();
    let cmp_sid = ctx.code.append_new_stmt(code);
    let target = ctx.stmts_mut().new_orphan();
    *ctx.stmts_mut().get_mut(cmp_sid) = make_stmt(StmtKind::Cmp { op, lhs: lv, rhs: rv, target });
    ctx.stmts_mut().get_mut(cmp_sid).owner = code;

    let goto_sid = ctx.code.append_new_stmt(code);
    let goto_target = ctx.stmts_mut().new_orphan();
    *ctx.stmts_mut().get_mut(goto_sid) = make_stmt(StmtKind::Goto { target: goto_target });
    ctx.stmts_mut().get_mut(goto_sid).owner = code;

    ctx.code.add_true_jump(code, cmp_sid);
    ctx.code.add_false_jump(code, goto_sid);
    code
}

/// `!x`: swap `x`'s true/false backpatch lists if `x` is already a `Cond`;
/// otherwise compare the materialized value against zero (§4.2 "build_lnot").
pub fn build_lnot(ctx: &mut Context, owner: Handle<Code>, operand: Handle<Code>) -> Handle<Code> {
    if ctx.code.get(operand).is_cond() {
        let truejumps = std::mem::take(&mut ctx.code.get_mut(operand).truejumps);
        let falsejumps = std::mem::take(&mut ctx.code.get_mut(operand).falsejumps);
        ctx.code.get_mut(operand).truejumps = falsejumps;
        ctx.code.get_mut(operand).falsejumps = truejumps;
        return operand;
    }
    let v = to_expr(ctx, owner, operand);
    let zero = ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
    build_relop(ctx, owner, CondOp::Eq, ctx.code.of_expr(v), zero)
}

/// `a && b`: evaluate `a`; on true, fall through into `b`; on false, skip
/// `b` and inherit `a`'s false-jump list directly (§4.2 "short-circuit").
pub fn build_land(ctx: &mut Context, owner: Handle<Code>, lhs: Handle<Code>, rhs: Handle<Code>) -> Handle<Code> {
    let lhs_cond = as_cond(ctx, owner, lhs);
    let rhs_cond = as_cond(ctx, owner, rhs);
    let lhs_true = std::mem::take(&mut ctx.code.get_mut(lhs_cond).truejumps);
    for sid in lhs_true {
        redirect_jump_to_start_of(ctx, sid, rhs_cond);
    }
    let mut lhs_false = std::mem::take(&mut ctx.code.get_mut(lhs_cond).falsejumps);
    ctx.code.append(lhs_cond, rhs_cond);
    ctx.code.get_mut(lhs_cond).falsejumps.append(&mut lhs_false);
    lhs_cond
}

/// `a || b`: evaluate `a`; on false, fall through into `b`; on true, skip
/// `b` and inherit `a`'s true-jump list directly.
pub fn build_lor(ctx: &mut Context, owner: Handle<Code>, lhs: Handle<Code>, rhs: Handle<Code>) -> Handle<Code> {
    let lhs_cond = as_cond(ctx, owner, lhs);
    let rhs_cond = as_cond(ctx, owner, rhs);
    let lhs_false = std::mem::take(&mut ctx.code.get_mut(lhs_cond).falsejumps);
    for sid in lhs_false {
        redirect_jump_to_start_of(ctx, sid, rhs_cond);
    }
    let mut lhs_true = std::mem::take(&mut ctx.code.get_mut(lhs_cond).truejumps);
    ctx.code.append(lhs_cond, rhs_cond);
    ctx.code.get_mut(lhs_cond).truejumps.append(&mut lhs_true);
    lhs_cond
}

/// Coerce `code` to a `Cond` block: a plain `Expr` becomes `expr != 0`.
fn as_cond(ctx: &mut Context, owner: Handle<Code>, code: Handle<Code>) -> Handle<Code> {
    if ctx.code.get(code).is_cond() {
        return code;
    }
    let v = to_expr(ctx, owner, code);
    let val_code = ctx.code.of_expr(v);
    let zero = ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
    build_relop(ctx, owner, CondOp::Ne, val_code, zero)
}

fn redirect_jump_to_start_of(ctx: &mut Context, jump: Handle<crate::stmt::Stmt>, code: Handle<Code>) {
    let first = ctx.code.get(code).first;
    let target = if first.is_none() { ctx.stmts_mut().new_orphan() } else { first };
    redirect_jump(ctx, jump, target);
}

/// Close out `from`'s dangling falsejump list (e.g. an else-less `if`'s
/// fallthrough) by pointing every pending jump at the start of `next`, the
/// block the caller is about to sequence in afterward. Leaves `from`'s
/// falsejumps empty; the caller is still responsible for `ctx.code.append`
/// to splice the statement lists together.
pub fn redirect_falsejumps_to(ctx: &mut Context, from: Handle<Code>, next: Handle<Code>) {
    let falsejumps = std::mem::take(&mut ctx.code.get_mut(from).falsejumps);
    for sid in falsejumps {
        redirect_jump_to_start_of(ctx, sid, next);
    }
}

/// `if (cond) then else_`: close `cond`'s true-jumps to the start of `then`,
/// its false-jumps to the start of `else_` (or to the join point, if no
/// `else`), and append both arms in sequence followed by a join label
/// (§4.2 "build_if").
pub fn build_if(ctx: &mut Context, owner: Handle<Code>, cond: Handle<Code>, then_block: Handle<Code>, else_block: Option<Handle<Code>>) -> Handle<Code> {
    let cond = as_cond(ctx, owner, cond);
    let truejumps = std::mem::take(&mut ctx.code.get_mut(cond).truejumps);
    for sid in truejumps {
        redirect_jump_to_start_of(ctx, sid, then_block);
    }
    ctx.code.append(cond, then_block);

    match else_block {
        Some(else_block) => {
            let falsejumps = std::mem::take(&mut ctx.code.get_mut(cond).falsejumps);
            for sid in falsejumps {
                redirect_jump_to_start_of(ctx, sid, else_block);
            }
            ctx.code.append(cond, else_block);
        }
        None => {
            // No else arm: the false path simply falls through past `then`,
            // so its backpatch list survives on `cond` for the caller (the
            // statement sequencer) to close against whatever comes next.
            let falsejumps = std::mem::take(&mut ctx.code.get_mut(cond).falsejumps);
            ctx.code.get_mut(cond).falsejumps = falsejumps;
        }
    }
    cond
}

/// Push a new loop frame onto `ctx.loops` before the caller walks the body
/// of a `for`/`while`/`do`, so any `build_break`/`build_continue` reached
/// while building it resolve against this loop rather than an enclosing one
/// (§4.3 "for", §4.4 "Environment"). `continue` targets `rest_stmt` if the
/// loop has one, otherwise the loop head itself. Returns the orphan
/// statement `break` targets; the caller passes it through unchanged to
/// [`build_for`], which appends it after the loop.
pub fn enter_loop(
    ctx: &mut Context,
    first_stmt: Handle<crate::stmt::Stmt>,
    rest_stmt: Option<Handle<crate::stmt::Stmt>>,
) -> Handle<crate::stmt::Stmt> {
    let break_target = ctx.stmts_mut().new_orphan();
    let continue_target = rest_stmt.unwrap_or(first_stmt);
    ctx.loops.push_loop(continue_target, break_target);
    break_target
}

/// Pop the frame [`enter_loop`] pushed. Must be called once the loop's body
/// has been fully built and passed to [`build_for`].
pub fn exit_loop(ctx: &mut Context) {
    ctx.loops.pop();
}

/// Push a switch frame: `break` inside a `switch` targets the statement
/// after it, but `continue` must skip past it to the next enclosing loop
/// (§4.4), which `LoopEnv::push_switch` encodes by leaving no continue
/// target of its own. There is no dedicated `build_switch`: case dispatch is
/// just a chain of `build_if`s over equality comparisons against the
/// scrutinee, built by the caller; this only manages the break-target frame
/// the dispatch chain's `break`s resolve against.
pub fn enter_switch(ctx: &mut Context) -> Handle<crate::stmt::Stmt> {
    let break_target = ctx.stmts_mut().new_orphan();
    ctx.loops.push_switch(break_target);
    break_target
}

/// Pop the frame [`enter_switch`] pushed.
pub fn exit_switch(ctx: &mut Context) {
    ctx.loops.pop();
}

/// `break;`: jump to the innermost loop or switch's break target (§4.3,
/// §4.4). Fatal if reached outside of one.
pub fn build_break(ctx: &mut Context, owner: Handle<Code>) -> crate::error::CirResult<Handle<Code>> {
    match ctx.loops.break_target() {
        Some(target) => Ok(build_goto_code(ctx, owner, target)),
        None => crate::cir_fatal!(ctx.locations, "break statement not within a loop or switch"),
    }
}

/// `continue;`: jump to the innermost loop's continue target, skipping past
/// any enclosing `switch` (§4.3, §4.4). Fatal if reached outside of a loop.
pub fn build_continue(ctx: &mut Context, owner: Handle<Code>) -> crate::error::CirResult<Handle<Code>> {
    match ctx.loops.continue_target() {
        Some(target) => Ok(build_goto_code(ctx, owner, target)),
        None => crate::cir_fatal!(ctx.locations, "continue statement not within a loop"),
    }
}

fn build_goto_code(ctx: &mut Context, owner: Handle<Code>, target: Handle<crate::stmt::Stmt>) -> Handle<Code> {
    let _ = owner;
    let code = ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
    let sid = ctx.code.append_new_stmt(code);
    *ctx.stmts_mut().get_mut(sid) = make_stmt(StmtKind::Goto { target });
    ctx.stmts_mut().get_mut(sid).owner = code;
    code
}

/// `for (;cond;) thenCode afterCode` with `firstStmt`/`restStmt` anchoring
/// the loop head and increment so `continue` can retarget them (§4.2
/// "build_for", open question: `restStmt` ownership). `restStmt`, if given,
/// is spliced in between the body and the back-edge and is owned by the
/// loop from this call forward — the caller must not reuse it. `break_target`
/// must be the handle [`enter_loop`] returned for this same loop; it is
/// appended as an orphan statement after the back edge, which is what
/// `build_break` jumps to from anywhere in the body. The caller must call
/// [`exit_loop`] after building `then_code`/`after_code` and before this call.
pub fn build_for(
    ctx: &mut Context,
    owner: Handle<Code>,
    cond: Option<Handle<Code>>,
    first_stmt: Handle<crate::stmt::Stmt>,
    then_code: Handle<Code>,
    after_code: Option<Handle<Code>>,
    rest_stmt: Option<Handle<crate::stmt::Stmt>>,
    break_target: Handle<crate::stmt::Stmt>,
) -> Handle<Code> {
    let loop_code = ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
    ctx.code.append_orphan_stmt(loop_code, first_stmt);

    if let Some(cond) = cond {
        let cond = as_cond(ctx, owner, cond);
        let truejumps = std::mem::take(&mut ctx.code.get_mut(cond).truejumps);
        for sid in truejumps {
            redirect_jump_to_start_of(ctx, sid, then_code);
        }
        ctx.code.append(loop_code, cond);
        ctx.code.append(loop_code, then_code);
        let exit_falsejumps = std::mem::take(&mut ctx.code.get_mut(cond).falsejumps);
        for sid in exit_falsejumps {
            redirect_jump(ctx, sid, break_target);
        }
    } else {
        ctx.code.append(loop_code, then_code);
    }

    if let Some(rest) = rest_stmt {
        ctx.code.append_orphan_stmt(loop_code, rest);
    }
    if let Some(after) = after_code {
        ctx.code.append(loop_code, after);
    }

    let back_edge = ctx.code.append_new_stmt(loop_code);
    *ctx.stmts_mut().get_mut(back_edge) = make_stmt(StmtKind::Goto { target: first_stmt });
    ctx.stmts_mut().get_mut(back_edge).owner = loop_code;

    ctx.code.append_orphan_stmt(loop_code, break_target);

    loop_code
}

/// `-x`/`~x`: convert to a plain value, constant-fold on an integer literal,
/// otherwise emit one `UnOp` statement into a fresh temp of the same type
/// (§4.2 "build_op", the unary arithmetic operators). `!` goes through
/// [`build_lnot`] instead, since it produces a `Cond`, not an `Expr`.
pub fn build_unop(ctx: &mut Context, owner: Handle<Code>, op: UnOp, operand: Handle<Code>) -> Handle<Code> {
    assert!(matches!(op, UnOp::Neg | UnOp::BNot), "build_unop only handles Neg/BNot; use build_lnot for !");
    let v = to_expr(ctx, owner, operand);
    let ty = value_type(ctx, &v);
    if let Some(n) = int_value(&v) {
        let folded = match op {
            UnOp::Neg => n.wrapping_neg(),
            UnOp::BNot => !n,
            _ => unreachable!(),
        };
        let k = ty.as_int().unwrap_or(IKind::Int);
        return ctx.code.of_expr(Value::of_i64(k, folded));
    }
    let tmp = new_temp(ctx, owner, ty);
    emit(ctx, owner, StmtKind::UnOp { dst: tmp.clone(), op, operand: v });
    ctx.code.of_expr(tmp)
}

fn new_temp(ctx: &mut Context, owner: Handle<Code>, ty: Type) -> Value {
    let v = ctx.new_var(owner);
    ctx.vars.get_mut(v).ty = Some(ty);
    ctx.vars.get_mut(v).storage = Storage::Register;
    Value::of_var(v)
}

fn emit(ctx: &mut Context, owner: Handle<Code>, kind: StmtKind) {
    let sid = ctx.code.append_new_stmt(owner);
    ctx.stmts_mut().get_mut(sid).kind = kind;
}

/// Walk a field chain against the var's declared type, descending through
/// each named field's comp in turn (§3.4 "field chains").
fn resolve_field_chain(ctx: &Context, base: Type, fields: &[crate::name::CirName]) -> Type {
    let mut ty = base;
    for &field_name in fields {
        let unrolled = ctx.unroll(&ty);
        ty = match unrolled.kind() {
            crate::types::TypeKind::Comp(cid) => {
                let comp = ctx.comp(*cid);
                match comp.field_index(field_name) {
                    Some(i) => comp.fields[i].ty.clone(),
                    None => crate::cir_bug!("field not found on composite type"),
                }
            }
            _ => crate::cir_bug!("field access on a non-composite type"),
        };
    }
    ty
}

fn value_type(ctx: &Context, v: &Value) -> Type {
    if let Some(t) = v.get_cast_type() {
        return t.clone();
    }
    match v.kind() {
        crate::value::ValueKind::Var(h, fields) => {
            let base = ctx.vars.get(*h).ty.clone().unwrap_or_else(Type::void);
            resolve_field_chain(ctx, base, fields)
        }
        crate::value::ValueKind::Mem(h, fields) => {
            let ptr_ty = ctx.vars.get(*h).ty.clone().unwrap_or_else(Type::void);
            let base = ptr_ty.base_type().cloned().unwrap_or(ptr_ty);
            resolve_field_chain(ctx, base, fields)
        }
        _ => v.raw_type(&ctx.machine),
    }
}

trait ValueExt {
    fn is_ptr_like(&self, ctx: &Context) -> bool;
}
impl ValueExt for Value {
    fn is_ptr_like(&self, ctx: &Context) -> bool {
        value_type(ctx, self).is_ptr()
    }
}
