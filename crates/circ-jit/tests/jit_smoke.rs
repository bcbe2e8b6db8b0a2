//! End-to-end smoke tests: build a handful of functions directly against
//! `circ-core`'s arenas and builder entry points (no frontend exists yet),
//! JIT-compile them, and check the machine code actually computes the right
//! answer.

use circ_core::arena::Handle;
use circ_core::builder;
use circ_core::context::Context;
use circ_core::machine::{IKind, Machine};
use circ_core::op::{BinOp, CondOp, UnOp};
use circ_core::stmt::StmtKind;
use circ_core::types::{FunParam, Type};
use circ_core::value::Value;
use circ_core::var::Storage;
use circ_jit::Engine;

/// Declare a global function variable with `n_params` int formals and an
/// empty body, ready for the caller to append statements into.
fn declare_function(ctx: &mut Context, name: &str, n_params: usize) -> (Handle<circ_core::var::Var>, Vec<Handle<circ_core::var::Var>>) {
    let body = ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
    // Body starts life as an Expr placeholder; callers append real
    // statements directly, so the "value" never gets read.
    let func = ctx.vars.push(circ_core::var::Var::new(Handle::NONE));
    let formals: Vec<_> = (0..n_params)
        .map(|_| {
            let p = ctx.new_var(body);
            ctx.vars.get_mut(p).ty = Some(Type::int(IKind::Int));
            ctx.vars.get_mut(p).storage = Storage::Register;
            p
        })
        .collect();
    let params: Vec<FunParam> = formals
        .iter()
        .map(|_| FunParam { name: ctx.names.intern("p"), ty: Type::int(IKind::Int) })
        .collect();
    ctx.vars.get_mut(func).ty = Some(Type::fun(Type::int(IKind::Int), params, false));
    ctx.vars.get_mut(func).name = ctx.names.intern(name);
    ctx.vars.get_mut(func).storage = Storage::Static;
    ctx.vars.get_mut(func).body = body;
    ctx.vars.get_mut(func).formals = formals.clone();
    (func, formals)
}

fn append_return(ctx: &mut Context, owner: Handle<circ_core::code::Code>, value: Option<Value>) {
    let sid = ctx.code.append_new_stmt(owner);
    ctx.stmts_mut().get_mut(sid).kind = StmtKind::Return { value };
}

#[test]
fn adds_two_arguments() {
    let mut ctx = Context::new(Machine::build());
    let (func, formals) = declare_function(&mut ctx, "add", 2);
    let body = ctx.vars.get(func).body;

    let a = Value::of_var(formals[0]);
    let b = Value::of_var(formals[1]);
    let sum_code = builder::build_binop(&mut ctx, body, BinOp::Plus, ctx.code.of_expr(a), ctx.code.of_expr(b));
    let sum = builder::to_expr(&mut ctx, body, sum_code);
    append_return(&mut ctx, body, Some(sum));

    let mut engine = Engine::new(4096).unwrap();
    engine.install_call_stub();
    let entry = engine.compile_reachable(&mut ctx, func);

    let result = engine.call_via_stub(entry, &[3, 39, 0, 0, 0, 0]);
    assert_eq!(result, 42);
}

#[test]
fn branches_on_comparison() {
    let mut ctx = Context::new(Machine::build());
    let (func, formals) = declare_function(&mut ctx, "max", 2);
    let body = ctx.vars.get(func).body;

    let a = Value::of_var(formals[0]);
    let b = Value::of_var(formals[1]);
    let cond = builder::build_relop(&mut ctx, body, CondOp::Gt, ctx.code.of_expr(a.clone()), ctx.code.of_expr(b.clone()));
    let then_block = ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
    append_return(&mut ctx, then_block, Some(a));
    let else_block = ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
    append_return(&mut ctx, else_block, Some(b));
    let whole = builder::build_if(&mut ctx, body, cond, then_block, Some(else_block));
    ctx.code.append(body, whole);

    let mut engine = Engine::new(4096).unwrap();
    engine.install_call_stub();
    let entry = engine.compile_reachable(&mut ctx, func);

    assert_eq!(engine.call_via_stub(entry, &[10, 3, 0, 0, 0, 0]), 10);
    assert_eq!(engine.call_via_stub(entry, &[3, 10, 0, 0, 0, 0]), 10);
}

#[test]
fn recursive_call_through_compiling_placeholder() {
    let mut ctx = Context::new(Machine::build());
    let (func, formals) = declare_function(&mut ctx, "fact", 1);
    let body = ctx.vars.get(func).body;
    let n = Value::of_var(formals[0]);

    // if (n <= 1) return 1;  -- no else arm, so its falsejumps dangle until
    // redirected to wherever the rest of the function picks up.
    let base_cond = builder::build_relop(
        &mut ctx,
        body,
        CondOp::Le,
        ctx.code.of_expr(n.clone()),
        ctx.code.of_expr(Value::of_i64(IKind::Int, 1)),
    );
    let base_then = ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
    append_return(&mut ctx, base_then, Some(Value::of_i64(IKind::Int, 1)));
    let base_if = builder::build_if(&mut ctx, body, base_cond, base_then, None);

    // return n * fact(n - 1); -- built as its own block so `base_if`'s
    // fallthrough jumps have a concrete start-of-block to target.
    let rest = ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
    let n_minus_1 = builder::build_binop(
        &mut ctx,
        rest,
        BinOp::Minus,
        ctx.code.of_expr(n.clone()),
        ctx.code.of_expr(Value::of_i64(IKind::Int, 1)),
    );
    let n_minus_1 = builder::to_expr(&mut ctx, rest, n_minus_1);

    let call_sid = ctx.code.append_new_stmt(rest);
    let call_dst = {
        let tmp = ctx.new_var(rest);
        ctx.vars.get_mut(tmp).ty = Some(Type::int(IKind::Int));
        ctx.vars.get_mut(tmp).storage = Storage::Register;
        Value::of_var(tmp)
    };
    ctx.stmts_mut().get_mut(call_sid).kind =
        StmtKind::Call { dst: call_dst.clone(), target: Value::of_var(func), args: std::sync::Arc::from(vec![n_minus_1]) };

    let product_code = builder::build_binop(&mut ctx, rest, BinOp::Mul, ctx.code.of_expr(n), ctx.code.of_expr(call_dst));
    let product = builder::to_expr(&mut ctx, rest, product_code);
    append_return(&mut ctx, rest, Some(product));

    builder::redirect_falsejumps_to(&mut ctx, base_if, rest);
    ctx.code.append(body, base_if);
    ctx.code.append(body, rest);

    let mut engine = Engine::new(8192).unwrap();
    engine.install_call_stub();
    let entry = engine.compile_reachable(&mut ctx, func);

    assert_eq!(engine.call_via_stub(entry, &[5, 0, 0, 0, 0, 0]), 120);
    assert_eq!(engine.call_via_stub(entry, &[0, 0, 0, 0, 0, 0]), 1);
}

/// A file-scope variable (`owner` is `Handle::NONE`) accumulates across
/// separate invocations of the same compiled function, proving the global
/// arena is real backing memory and not just a stack slot that happens to
/// read back as zero.
#[test]
fn writes_and_reads_a_global_variable() {
    let mut ctx = Context::new(Machine::build());
    let counter = ctx.vars.push(circ_core::var::Var::new(Handle::NONE));
    ctx.vars.get_mut(counter).ty = Some(Type::int(IKind::Int));
    ctx.vars.get_mut(counter).storage = Storage::Static;
    ctx.vars.get_mut(counter).name = ctx.names.intern("counter");

    let (func, formals) = declare_function(&mut ctx, "bump", 1);
    let body = ctx.vars.get(func).body;

    let delta = Value::of_var(formals[0]);
    let sum_code =
        builder::build_binop(&mut ctx, body, BinOp::Plus, ctx.code.of_expr(Value::of_var(counter)), ctx.code.of_expr(delta));
    let sum = builder::to_expr(&mut ctx, body, sum_code);
    let store_sid = ctx.code.append_new_stmt(body);
    ctx.stmts_mut().get_mut(store_sid).kind = StmtKind::UnOp { dst: Value::of_var(counter), op: UnOp::Identity, operand: sum };
    append_return(&mut ctx, body, Some(Value::of_var(counter)));

    let mut engine = Engine::new(4096).unwrap();
    engine.install_call_stub();
    let entry = engine.compile_reachable(&mut ctx, func);

    assert_eq!(engine.call_via_stub(entry, &[10, 0, 0, 0, 0, 0]), 10);
    assert_eq!(engine.call_via_stub(entry, &[5, 0, 0, 0, 0, 0]), 15);
    assert_eq!(engine.call_via_stub(entry, &[0, 0, 0, 0, 0, 0]), 15);
}

/// Two distinct compiled functions reading/writing the same global see each
/// other's updates, since both load the same arena base into `r10`. `run`
/// calls `set_shared` then `get_shared`, so both land in the same
/// `compile_reachable` pass via the ordinary call-graph reachability walk.
#[test]
fn two_functions_share_a_global() {
    let mut ctx = Context::new(Machine::build());
    let shared = ctx.vars.push(circ_core::var::Var::new(Handle::NONE));
    ctx.vars.get_mut(shared).ty = Some(Type::int(IKind::Int));
    ctx.vars.get_mut(shared).storage = Storage::Static;
    ctx.vars.get_mut(shared).name = ctx.names.intern("shared");

    let (setter, formals) = declare_function(&mut ctx, "set_shared", 1);
    let setter_body = ctx.vars.get(setter).body;
    let new_val = Value::of_var(formals[0]);
    let store_sid = ctx.code.append_new_stmt(setter_body);
    ctx.stmts_mut().get_mut(store_sid).kind =
        StmtKind::UnOp { dst: Value::of_var(shared), op: UnOp::Identity, operand: ctx.code.of_expr(new_val) };
    append_return(&mut ctx, setter_body, Some(Value::of_i64(IKind::Int, 0)));

    let (getter, _) = declare_function(&mut ctx, "get_shared", 0);
    let getter_body = ctx.vars.get(getter).body;
    append_return(&mut ctx, getter_body, Some(Value::of_var(shared)));

    let (runner, runner_formals) = declare_function(&mut ctx, "run", 1);
    let runner_body = ctx.vars.get(runner).body;
    let set_call_sid = ctx.code.append_new_stmt(runner_body);
    let set_dst = {
        let tmp = ctx.new_var(runner_body);
        ctx.vars.get_mut(tmp).ty = Some(Type::int(IKind::Int));
        ctx.vars.get_mut(tmp).storage = Storage::Register;
        Value::of_var(tmp)
    };
    ctx.stmts_mut().get_mut(set_call_sid).kind = StmtKind::Call {
        dst: set_dst,
        target: Value::of_var(setter),
        args: std::sync::Arc::from(vec![Value::of_var(runner_formals[0])]),
    };
    let get_call_sid = ctx.code.append_new_stmt(runner_body);
    let get_dst = {
        let tmp = ctx.new_var(runner_body);
        ctx.vars.get_mut(tmp).ty = Some(Type::int(IKind::Int));
        ctx.vars.get_mut(tmp).storage = Storage::Register;
        Value::of_var(tmp)
    };
    ctx.stmts_mut().get_mut(get_call_sid).kind =
        StmtKind::Call { dst: get_dst.clone(), target: Value::of_var(getter), args: std::sync::Arc::from(Vec::new()) };
    append_return(&mut ctx, runner_body, Some(get_dst));

    let mut engine = Engine::new(8192).unwrap();
    engine.install_call_stub();
    let entry = engine.compile_reachable(&mut ctx, runner);

    assert_eq!(engine.call_via_stub(entry, &[77, 0, 0, 0, 0, 0]), 77);
}
