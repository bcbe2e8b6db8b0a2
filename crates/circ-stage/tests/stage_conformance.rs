//! End-to-end stage-trigger behavior: functions built directly against
//! `circ-core`'s builder (no frontend exists yet), evaluated at "compile
//! time" through `circ_stage::stage_trigger`, with the result checked for
//! the exact constant the staged computation should fold down to.

use circ_core::arena::Handle;
use circ_core::builder;
use circ_core::context::Context;
use circ_core::machine::{IKind, Machine};
use circ_core::op::BinOp;
use circ_core::stmt::StmtKind;
use circ_core::typedef::Typedef;
use circ_core::types::{FunParam, Type};
use circ_core::value::Value;
use circ_core::var::{Storage, Var};

fn declare_code_id_typedef(ctx: &mut Context) -> Handle<Typedef> {
    let name = ctx.names.intern("CirCodeId");
    ctx.typedefs.push(Typedef { name, ty: Type::int(IKind::Int) })
}

fn declare_int_function(ctx: &mut Context, name: &str, n_params: usize) -> (Handle<Var>, Vec<Handle<Var>>) {
    let body = ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
    let func = ctx.vars.push(Var::new(Handle::NONE));
    let formals: Vec<_> = (0..n_params)
        .map(|_| {
            let p = ctx.new_var(body);
            ctx.vars.get_mut(p).ty = Some(Type::int(IKind::Int));
            ctx.vars.get_mut(p).storage = Storage::Register;
            p
        })
        .collect();
    let params: Vec<FunParam> =
        formals.iter().map(|_| FunParam { name: ctx.names.intern("p"), ty: Type::int(IKind::Int) }).collect();
    ctx.vars.get_mut(func).ty = Some(Type::fun(Type::int(IKind::Int), params, false));
    ctx.vars.get_mut(func).name = ctx.names.intern(name);
    ctx.vars.get_mut(func).storage = Storage::Static;
    ctx.vars.get_mut(func).body = body;
    ctx.vars.get_mut(func).formals = formals.clone();
    (func, formals)
}

fn append_return(ctx: &mut Context, owner: Handle<circ_core::code::Code>, value: Value) {
    let sid = ctx.code.append_new_stmt(owner);
    ctx.stmts_mut().get_mut(sid).kind = StmtKind::Return { value: Some(value) };
}

/// `square(n) { return n * n; }` staged with `21`, then the literal it folds
/// to fed straight into `increment(n) { return n + 1; }` staged again — two
/// independent stage triggers chained entirely at compile time, with no
/// runtime representation of either call ever generated.
#[test]
fn nested_stage_triggers_fold_to_a_constant() {
    let mut ctx = Context::new(Machine::build());
    let code_id = declare_code_id_typedef(&mut ctx);

    let (square, sq_formals) = declare_int_function(&mut ctx, "square", 1);
    let sq_body = ctx.vars.get(square).body;
    let n = Value::of_var(sq_formals[0]);
    let prod = builder::build_binop(&mut ctx, sq_body, BinOp::Mul, ctx.code.of_expr(n.clone()), ctx.code.of_expr(n));
    let prod = builder::to_expr(&mut ctx, sq_body, prod);
    append_return(&mut ctx, sq_body, prod);

    let (incr, incr_formals) = declare_int_function(&mut ctx, "increment", 1);
    let incr_body = ctx.vars.get(incr).body;
    let m = Value::of_var(incr_formals[0]);
    let sum = builder::build_binop(
        &mut ctx,
        incr_body,
        BinOp::Plus,
        ctx.code.of_expr(m),
        ctx.code.of_expr(Value::of_i64(IKind::Int, 1)),
    );
    let sum = builder::to_expr(&mut ctx, incr_body, sum);
    append_return(&mut ctx, incr_body, sum);

    let arg = ctx.code.of_expr(Value::of_i64(IKind::Int, 21));
    let squared = circ_stage::stage_trigger(&mut ctx, code_id, square, &[arg]).unwrap();
    assert_eq!(ctx.code.get(squared).value().unwrap().get_i64(), 441);

    let incremented = circ_stage::stage_trigger(&mut ctx, code_id, incr, &[squared]).unwrap();
    assert_eq!(ctx.code.get(incremented).value().unwrap().get_i64(), 442);
}

/// A `CirCodeId` formal threaded through to the return position carries the
/// exact `Handle<Code>` across the call untouched, so a fragment chosen by
/// a staged conditional can be spliced straight into the surrounding
/// program afterward.
#[test]
fn code_id_formal_survives_the_call_unchanged() {
    let mut ctx = Context::new(Machine::build());
    let code_id = declare_code_id_typedef(&mut ctx);
    let code_id_ty = Type::named(code_id);

    let body = ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
    let func = ctx.vars.push(Var::new(Handle::NONE));
    let formal = ctx.new_var(body);
    ctx.vars.get_mut(formal).ty = Some(code_id_ty.clone());
    ctx.vars.get_mut(formal).storage = Storage::Register;
    ctx.vars.get_mut(func).ty =
        Some(Type::fun(code_id_ty, vec![FunParam { name: ctx.names.intern("c"), ty: Type::named(code_id) }], false));
    ctx.vars.get_mut(func).name = ctx.names.intern("identity");
    ctx.vars.get_mut(func).storage = Storage::Static;
    ctx.vars.get_mut(func).body = body;
    ctx.vars.get_mut(func).formals = vec![formal];
    append_return(&mut ctx, body, Value::of_var(formal));

    let fragment = ctx.code.of_expr(Value::of_i64(IKind::Int, 99));

    let result = circ_stage::stage_trigger(&mut ctx, code_id, func, &[fragment]).unwrap();

    assert_eq!(result, fragment);
}
