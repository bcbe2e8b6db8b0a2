//! Parser-facing glue: installing a declarator-folded [`Type`] as a
//! variable, typedef, or tag binding, and assembling a function definition
//! onto an already-installed function variable.
//!
//! Folding a declarator chain (`*`, `[]`, `()`) onto a base type into one
//! concrete `Type` is the frontend's job; this module only does what's left
//! once that `Type` exists: bookkeeping the name against the environment the
//! way `declareOneVar`/`declareOneTypedef`/`makeGlobalVar` do in the
//! original parser, including the global-scope, `combine`-based
//! redeclaration path.

use crate::arena::Handle;
use crate::cir_fatal;
use crate::code::Code;
use crate::comp::{Comp, Field};
use crate::context::Context;
use crate::enum_::{Enum, EnumItem};
use crate::env::{NameBinding, TagBinding};
use crate::error::CirResult;
use crate::machine::IKind;
use crate::name::CirName;
use crate::types::{self, Type, TypeKind};
use crate::typedef::Typedef;
use crate::var::{Storage, Var};

/// Install a variable declaration named `name` of type `ty` (`None` for an
/// as-yet-uninferred `__auto_type`) at the current scope.
///
/// In the global scope, a name already bound to a `Var` is merged with the
/// new declaration via [`types::combine`] and re-uses the existing handle
/// (`makeGlobalVar`), so two prototypes of the same function, or a
/// prototype followed by its definition, share one `Var`. Redeclaring a
/// name already bound in the *current* local scope is always fatal; a name
/// that merely shadows an outer scope gets its own fresh handle.
pub fn install_var(
    ctx: &mut Context,
    owner: Handle<Code>,
    name: CirName,
    ty: Option<Type>,
    storage: Storage,
) -> CirResult<Handle<Var>> {
    if ctx.env.is_global() {
        if let Some(existing) = ctx.env.find_global_name(name) {
            let old = match existing {
                NameBinding::Var(v) => v,
                _ => cir_fatal!(ctx.locations, "'{}' declared as a different kind of symbol", ctx.names.resolve(name)),
            };
            let old_ty = ctx.vars.get(old).ty.clone();
            let merged_ty = match (old_ty, ty) {
                (Some(o), Some(n)) => types::combine(&o, &n, &ctx.locations)?,
                (None, Some(n)) => n,
                (Some(o), None) => o,
                (None, None) => cir_fatal!(ctx.locations, "cannot infer a type for '{}'", ctx.names.resolve(name)),
            };
            ctx.vars.get_mut(old).ty = Some(merged_ty);
            ctx.vars.get_mut(old).storage = storage;
            return Ok(old);
        }
    } else if ctx.env.find_current_scope_name(name).is_some() {
        cir_fatal!(ctx.locations, "re-declaration of '{}' in local scope", ctx.names.resolve(name));
    }

    let v = ctx.vars.push(Var::new(owner));
    ctx.vars.get_mut(v).name = name;
    ctx.vars.get_mut(v).ty = ty;
    ctx.vars.get_mut(v).storage = storage;
    ctx.env.set_local_name(name, NameBinding::Var(v));
    Ok(v)
}

/// Install a typedef name. Unlike a variable, a typedef never merges with a
/// prior declaration: re-using the name in the same scope is always fatal
/// (`declareOneTypedef`).
pub fn install_typedef(ctx: &mut Context, name: CirName, ty: Type) -> CirResult<Handle<Typedef>> {
    if ctx.env.find_current_scope_name(name).is_some() {
        cir_fatal!(ctx.locations, "re-declaration of '{}'", ctx.names.resolve(name));
    }
    let tid = ctx.typedefs.push(Typedef { name, ty });
    ctx.env.set_local_name(name, NameBinding::Typedef(tid));
    Ok(tid)
}

/// Resolve a `struct`/`union` tag reference, creating a forward declaration
/// (`is_defined = false`) the first time `name` is seen. A second reference
/// to the same tag reuses the handle regardless of whether it has been
/// defined yet, so pointers to an incomplete type stay valid (§3.2, §4.4
/// "Tags... support forward declaration"). `name: None` is an anonymous
/// struct/union, which always gets a fresh handle.
pub fn declare_comp(ctx: &mut Context, name: Option<CirName>, is_struct: bool) -> CirResult<Handle<Comp>> {
    let Some(name) = name else {
        return Ok(ctx.comps.push(Comp::new(is_struct)));
    };
    if let Some(existing) = ctx.env.find_local_tag(name) {
        return match existing {
            TagBinding::Comp(cid) if ctx.comps.get(cid).is_struct == is_struct => Ok(cid),
            TagBinding::Comp(_) => cir_fatal!(ctx.locations, "'{}' declared as a different tag (struct vs union)", ctx.names.resolve(name)),
            TagBinding::Enum(_) => cir_fatal!(ctx.locations, "'{}' declared as a different tag kind", ctx.names.resolve(name)),
        };
    }
    let mut comp = Comp::new(is_struct);
    comp.name = Some(name);
    let cid = ctx.comps.push(comp);
    ctx.env.set_local_tag(name, TagBinding::Comp(cid));
    Ok(cid)
}

/// Fill in a forward-declared (or brand new) comp's fields and mark it
/// defined. Fatal on an attempt to redefine an already-defined comp.
pub fn define_comp(ctx: &mut Context, cid: Handle<Comp>, fields: Vec<Field>) -> CirResult<()> {
    if ctx.comps.get(cid).is_defined {
        cir_fatal!(ctx.locations, "redefinition of struct/union");
    }
    let comp = ctx.comps.get_mut(cid);
    comp.fields = fields;
    comp.is_defined = true;
    Ok(())
}

/// Resolve an `enum` tag reference the same way [`declare_comp`] does for
/// struct/union tags.
pub fn declare_enum(ctx: &mut Context, name: Option<CirName>) -> CirResult<Handle<Enum>> {
    let Some(name) = name else {
        return Ok(ctx.enums.push(Enum::new()));
    };
    if let Some(existing) = ctx.env.find_local_tag(name) {
        return match existing {
            TagBinding::Enum(eid) => Ok(eid),
            TagBinding::Comp(_) => cir_fatal!(ctx.locations, "'{}' declared as a different tag kind", ctx.names.resolve(name)),
        };
    }
    let mut e = Enum::new();
    e.name = Some(name);
    let eid = ctx.enums.push(e);
    ctx.env.set_local_tag(name, TagBinding::Enum(eid));
    Ok(eid)
}

/// Fill in a forward-declared (or brand new) enum's items and mark it
/// defined. Fatal on an attempt to redefine an already-defined enum.
pub fn define_enum(ctx: &mut Context, eid: Handle<Enum>, ikind: IKind, items: Vec<Handle<EnumItem>>) -> CirResult<()> {
    if ctx.enums.get(eid).is_defined {
        cir_fatal!(ctx.locations, "redefinition of enum");
    }
    let e = ctx.enums.get_mut(eid);
    e.ikind = ikind;
    e.items = items;
    e.is_defined = true;
    Ok(())
}

/// Attach a function body to an already-installed function variable: binds
/// each formal name against the function type's parameter list (already
/// merged by any prior prototypes via [`install_var`]'s `combine` path),
/// fills in `Var::formals`/`Var::body`, and registers each formal in the
/// current scope (the caller pushes that scope before walking the
/// parameter list and body, and pops it after). Fatal if `func` is not
/// function-typed, already has a body, or the formal count doesn't match
/// the (possibly combined) declared parameter list.
pub fn define_function(
    ctx: &mut Context,
    func: Handle<Var>,
    formal_names: &[CirName],
    body: Handle<Code>,
) -> CirResult<Vec<Handle<Var>>> {
    if !ctx.vars.get(func).body.is_none() {
        let name = ctx.vars.get(func).name;
        cir_fatal!(ctx.locations, "redefinition of function '{}'", ctx.names.resolve(name));
    }
    let ty = ctx.vars.get(func).ty.clone();
    let params = match ty.as_ref().map(|t| t.kind()) {
        Some(TypeKind::Fun(_, params, _)) => params.clone(),
        _ => cir_fatal!(ctx.locations, "function definition target is not function-typed"),
    };
    if params.len() != formal_names.len() {
        cir_fatal!(ctx.locations, "function definition has {} parameter(s), declaration has {}", formal_names.len(), params.len());
    }

    let formals: Vec<Handle<Var>> = formal_names
        .iter()
        .zip(params.iter())
        .map(|(&name, p)| {
            let v = ctx.new_var(body);
            ctx.vars.get_mut(v).name = name;
            ctx.vars.get_mut(v).ty = Some(p.ty.clone());
            ctx.vars.get_mut(v).storage = Storage::Register;
            ctx.env.set_local_name(name, NameBinding::Var(v));
            v
        })
        .collect();

    ctx.vars.get_mut(func).body = body;
    ctx.vars.get_mut(func).formals = formals.clone();
    Ok(formals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;
    use crate::types::FunParam;
    use crate::value::Value;

    fn void_fun(params: Vec<FunParam>) -> Type {
        Type::fun(Type::void(), params, false)
    }

    #[test]
    fn two_prototypes_then_a_definition_combine_into_one_var() {
        let mut ctx = Context::new(Machine::build());
        let g = ctx.names.intern("g");
        let int_ty = Type::int(IKind::Int);

        let ty1 = void_fun(vec![FunParam { name: CirName::dummy(), ty: int_ty.clone() }]);
        let v1 = install_var(&mut ctx, Handle::NONE, g, Some(ty1), Storage::Extern).unwrap();

        let ty2 = void_fun(vec![]);
        let v2 = install_var(&mut ctx, Handle::NONE, g, Some(ty2), Storage::Extern).unwrap();
        assert_eq!(v1, v2);

        let x = ctx.names.intern("x");
        let ty3 = void_fun(vec![FunParam { name: x, ty: int_ty }]);
        let v3 = install_var(&mut ctx, Handle::NONE, g, Some(ty3), Storage::Extern).unwrap();
        assert_eq!(v1, v3);

        let body = ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
        let formals = define_function(&mut ctx, v3, &[x], body).unwrap();
        assert_eq!(formals.len(), 1);
        assert_eq!(ctx.vars.get(v3).body, body);
    }

    #[test]
    fn reversed_prototype_order_also_combines() {
        let mut ctx = Context::new(Machine::build());
        let g = ctx.names.intern("g");
        let int_ty = Type::int(IKind::Int);

        let unspecified = void_fun(vec![]);
        let v1 = install_var(&mut ctx, Handle::NONE, g, Some(unspecified), Storage::Extern).unwrap();

        let prototyped = void_fun(vec![FunParam { name: CirName::dummy(), ty: int_ty }]);
        let v2 = install_var(&mut ctx, Handle::NONE, g, Some(prototyped), Storage::Extern).unwrap();
        assert_eq!(v1, v2);
    }

    #[test]
    fn conflicting_redeclaration_is_fatal() {
        let mut ctx = Context::new(Machine::build());
        let g = ctx.names.intern("g");

        let ty1 = void_fun(vec![FunParam { name: CirName::dummy(), ty: Type::int(IKind::Int) }]);
        install_var(&mut ctx, Handle::NONE, g, Some(ty1), Storage::Extern).unwrap();

        let ty2 = void_fun(vec![FunParam { name: CirName::dummy(), ty: Type::int(IKind::Char) }]);
        let err = install_var(&mut ctx, Handle::NONE, g, Some(ty2), Storage::Extern);
        assert!(err.is_err());
    }

    #[test]
    fn redeclaring_in_the_same_local_scope_is_fatal() {
        let mut ctx = Context::new(Machine::build());
        ctx.env.push_scope();
        let x = ctx.names.intern("x");
        install_var(&mut ctx, Handle::NONE, x, Some(Type::int(IKind::Int)), Storage::None).unwrap();
        let err = install_var(&mut ctx, Handle::NONE, x, Some(Type::int(IKind::Int)), Storage::None);
        assert!(err.is_err());
    }

    #[test]
    fn forward_declared_comp_keeps_its_handle_across_definition() {
        let mut ctx = Context::new(Machine::build());
        let tag = ctx.names.intern("L");
        let forward = declare_comp(&mut ctx, Some(tag), true).unwrap();
        assert!(!ctx.comps.get(forward).is_defined);

        let again = declare_comp(&mut ctx, Some(tag), true).unwrap();
        assert_eq!(forward, again);

        define_comp(&mut ctx, forward, vec![Field { name: ctx.names.intern("v"), ty: Type::int(IKind::Int), bitwidth: None }]).unwrap();
        assert!(ctx.comps.get(forward).is_defined);

        let err = define_comp(&mut ctx, forward, vec![]);
        assert!(err.is_err());
    }
}
