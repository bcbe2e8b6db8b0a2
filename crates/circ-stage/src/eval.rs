//! The `@f(args)` stage-trigger evaluator (§4.7): resolve the staged
//! function, pass its arguments across the JIT ABI boundary, run it to
//! completion on the host, and turn whatever it returned back into IR.
//!
//! `CirCodeId`-typed formals and the `CirCodeId` return type are passed and
//! interpreted as raw `Handle<Code>` indices; every other formal must
//! already be a compile-time integer constant, since the JIT call has to
//! happen before the rest of the program is known. This module never
//! touches identifier lookup — the caller (the parser, once it exists)
//! resolves `f` to a `Handle<Var>` and each argument to a `Handle<Code>`
//! before calling in here.

use circ_core::arena::Handle;
use circ_core::cir_fatal;
use circ_core::code::Code;
use circ_core::context::Context;
use circ_core::error::CirResult;
use circ_core::machine::{IKind, Machine};
use circ_core::typedef::Typedef;
use circ_core::types::{Type, TypeKind};
use circ_core::value::Value;
use circ_core::var::Var;
use circ_jit::Engine;

fn is_code_id_type(ty: &Type, code_id_typedef: Handle<Typedef>) -> bool {
    matches!(ty.kind(), TypeKind::Named(tid) if *tid == code_id_typedef)
}

fn sign_extend(raw: u64, ikind: IKind, m: &Machine) -> i64 {
    let size = ikind.size(m);
    if size >= 8 {
        return raw as i64;
    }
    let bits = size * 8;
    let mask = (1u64 << bits) - 1;
    let v = raw & mask;
    if ikind.is_signed() && v & (1u64 << (bits - 1)) != 0 {
        (v as i64) - ((mask as i64) + 1)
    } else {
        v as i64
    }
}

/// Code-page size handed to the throwaway JIT engine each stage trigger
/// spins up. `Engine::compile_reachable` flips its page read-execute as its
/// last step, so an engine is single-use; a fresh one per trigger is
/// simpler than trying to reopen a finished page for a later, unrelated
/// trigger that happens to share some of the same callees.
const STAGE_ENGINE_CODE_SIZE: usize = 64 * 1024;

/// Run the 5-step stage-trigger protocol for `@target(arg_codes)`.
///
/// `code_id_typedef` is the handle of the program's `CirCodeId` typedef, so
/// this can recognize which formals/the return type get raw-handle
/// treatment instead of constant evaluation; the caller resolves that
/// typedef once (it must exist for any program that uses staging at all)
/// and passes the handle down.
pub fn stage_trigger(
    ctx: &mut Context,
    code_id_typedef: Handle<Typedef>,
    target: Handle<Var>,
    arg_codes: &[Handle<Code>],
) -> CirResult<Handle<Code>> {
    let ty = ctx.vars.get(target).ty.clone();
    let (ret_ty, params, is_variadic) = match ty {
        Some(t) => match t.kind().clone() {
            TypeKind::Fun(ret, params, variadic) => (ret, params, variadic),
            _ => cir_fatal!(ctx.locations, "stage trigger target is not a function"),
        },
        None => cir_fatal!(ctx.locations, "stage trigger target has no type"),
    };
    if is_variadic {
        cir_fatal!(ctx.locations, "stage trigger target must not be variadic");
    }
    if params.len() != arg_codes.len() {
        cir_fatal!(
            ctx.locations,
            "stage trigger passed {} argument(s), target takes {}",
            arg_codes.len(),
            params.len()
        );
    }
    if arg_codes.len() > 6 {
        cir_fatal!(ctx.locations, "stage trigger target takes more arguments than the call ABI supports");
    }
    if ctx.vars.get(target).body.is_none() {
        cir_fatal!(ctx.locations, "stage trigger target has no definition");
    }

    let mut raw_args = [0u64; 6];
    for (i, (&arg, param)) in arg_codes.iter().zip(params.iter()).enumerate() {
        raw_args[i] = if is_code_id_type(&param.ty, code_id_typedef) {
            arg.raw() as u64
        } else {
            match ctx.code.get(arg).value() {
                Some(v) if v.is_int() => v.get_u64(),
                _ => cir_fatal!(
                    ctx.locations,
                    "stage trigger argument {} must be a compile-time integer constant",
                    i
                ),
            }
        };
    }

    let mut engine = match Engine::new(STAGE_ENGINE_CODE_SIZE) {
        Ok(e) => e,
        Err(e) => cir_fatal!(ctx.locations, "failed to allocate a code page for the stage trigger: {e}"),
    };
    engine.install_call_stub();
    let entry_offset = engine.compile_reachable(ctx, target);
    let raw_result = engine.call_via_stub(entry_offset, &raw_args);

    if is_code_id_type(&ret_ty, code_id_typedef) {
        return Ok(Handle::from_index(raw_result as u32));
    }
    let unrolled = ctx.unroll(&ret_ty);
    if unrolled.is_void() {
        // `CodeKind`/`ValueKind` have no dedicated "void" value; an
        // immediately-discarded zero constant is this evaluator's concrete
        // stand-in for "an empty Expr".
        return Ok(ctx.code.of_expr(Value::of_i64(IKind::Int, 0)));
    }
    if let Some(ikind) = unrolled.as_int() {
        let signed = sign_extend(raw_result, ikind, &ctx.machine);
        return Ok(ctx.code.of_expr(Value::of_i64(ikind, signed)));
    }
    cir_fatal!(ctx.locations, "stage trigger target returns a type that cannot be spliced back into the program");
}

#[cfg(test)]
mod tests {
    use super::*;
    use circ_core::builder;
    use circ_core::machine::Machine;
    use circ_core::op::{BinOp, CondOp};
    use circ_core::stmt::StmtKind;
    use circ_core::types::FunParam;
    use circ_core::var::Storage;

    fn declare_code_id_typedef(ctx: &mut Context) -> Handle<Typedef> {
        let name = ctx.names.intern("CirCodeId");
        ctx.typedefs.push(Typedef { name, ty: Type::int(IKind::Int) })
    }

    fn declare_function(
        ctx: &mut Context,
        name: &str,
        params: Vec<(&str, Type)>,
        ret: Type,
    ) -> (Handle<Var>, Vec<Handle<Var>>) {
        let body = ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
        let func = ctx.vars.push(Var::new(Handle::NONE));
        let formals: Vec<_> = params
            .iter()
            .map(|(_, ty)| {
                let p = ctx.new_var(body);
                ctx.vars.get_mut(p).ty = Some(ty.clone());
                ctx.vars.get_mut(p).storage = Storage::Register;
                p
            })
            .collect();
        let fun_params: Vec<FunParam> =
            params.iter().map(|(n, ty)| FunParam { name: ctx.names.intern(n), ty: ty.clone() }).collect();
        ctx.vars.get_mut(func).ty = Some(Type::fun(ret, fun_params, false));
        ctx.vars.get_mut(func).name = ctx.names.intern(name);
        ctx.vars.get_mut(func).storage = Storage::Static;
        ctx.vars.get_mut(func).body = body;
        ctx.vars.get_mut(func).formals = formals.clone();
        (func, formals)
    }

    fn append_return(ctx: &mut Context, owner: Handle<Code>, value: Option<Value>) {
        let sid = ctx.code.append_new_stmt(owner);
        ctx.stmts_mut().get_mut(sid).kind = StmtKind::Return { value };
    }

    #[test]
    fn passes_through_a_code_id_and_splices_the_chosen_fragment() {
        let mut ctx = Context::new(Machine::build());
        let code_id = declare_code_id_typedef(&mut ctx);
        let code_id_ty = Type::named(code_id);

        let (func, formals) = declare_function(
            &mut ctx,
            "pick",
            vec![("a", code_id_ty.clone()), ("b", code_id_ty.clone()), ("which", Type::int(IKind::Int))],
            code_id_ty,
        );
        let body = ctx.vars.get(func).body;
        let which = Value::of_var(formals[2]);

        let cond = builder::build_relop(
            &mut ctx,
            body,
            CondOp::Ne,
            ctx.code.of_expr(which),
            ctx.code.of_expr(Value::of_i64(IKind::Int, 0)),
        );
        let then_block = ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
        append_return(&mut ctx, then_block, Some(Value::of_var(formals[0])));
        let rest = ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
        append_return(&mut ctx, rest, Some(Value::of_var(formals[1])));
        let whole = builder::build_if(&mut ctx, body, cond, then_block, None);
        builder::redirect_falsejumps_to(&mut ctx, whole, rest);
        ctx.code.append(body, whole);
        ctx.code.append(body, rest);

        let code_a = ctx.code.of_expr(Value::of_i64(IKind::Int, 111));
        let code_b = ctx.code.of_expr(Value::of_i64(IKind::Int, 222));
        let code_which = ctx.code.of_expr(Value::of_i64(IKind::Int, 1));

        let result = stage_trigger(&mut ctx, code_id, func, &[code_a, code_b, code_which]).unwrap();

        assert_eq!(result, code_a);
        assert_eq!(ctx.code.get(result).value().unwrap().get_i64(), 111);
    }

    #[test]
    fn returns_an_integer_literal() {
        let mut ctx = Context::new(Machine::build());
        let code_id = declare_code_id_typedef(&mut ctx);

        let (func, formals) =
            declare_function(&mut ctx, "doubled", vec![("n", Type::int(IKind::Int))], Type::int(IKind::Int));
        let body = ctx.vars.get(func).body;
        let n = Value::of_var(formals[0]);
        let sum = builder::build_binop(&mut ctx, body, BinOp::Plus, ctx.code.of_expr(n.clone()), ctx.code.of_expr(n));
        let sum = builder::to_expr(&mut ctx, body, sum);
        append_return(&mut ctx, body, Some(sum));

        let code_n = ctx.code.of_expr(Value::of_i64(IKind::Int, 21));

        let result = stage_trigger(&mut ctx, code_id, func, &[code_n]).unwrap();

        assert_eq!(ctx.code.get(result).value().unwrap().get_i64(), 42);
    }

    #[test]
    fn returns_an_empty_expr_for_void() {
        let mut ctx = Context::new(Machine::build());
        let code_id = declare_code_id_typedef(&mut ctx);
        let (func, _) = declare_function(&mut ctx, "noop", vec![], Type::void());
        let body = ctx.vars.get(func).body;
        append_return(&mut ctx, body, None);

        let result = stage_trigger(&mut ctx, code_id, func, &[]).unwrap();

        assert!(ctx.code.get(result).is_expr());
    }

    #[test]
    fn rejects_a_non_constant_argument() {
        let mut ctx = Context::new(Machine::build());
        let code_id = declare_code_id_typedef(&mut ctx);
        let (func, _) = declare_function(&mut ctx, "ident", vec![("n", Type::int(IKind::Int))], Type::int(IKind::Int));
        let body = ctx.vars.get(func).body;
        append_return(&mut ctx, body, Some(Value::of_i64(IKind::Int, 0)));

        let other = ctx.vars.push(Var::new(Handle::NONE));
        let not_constant = ctx.code.of_expr(Value::of_var(other));

        let err = stage_trigger(&mut ctx, code_id, func, &[not_constant]);
        assert!(err.is_err());
    }
}
