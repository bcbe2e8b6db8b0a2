//! C declarator rendering: turns a [`Type`] plus a core text (a name, or
//! already an inner declarator such as `foo(int x)`) into a full C
//! declaration, chasing pointer/array/function layers outside-in the way a
//! human reads a declarator right-to-left (§4.1 "The type algebra").

use circ_core::context::Context;
use circ_core::machine::{FKind, IKind};
use circ_core::types::{Type, TypeKind};

use crate::names;

/// Render `ty` declared as `core` (typically a bare identifier). Passing an
/// empty `core` yields a standalone type spelling, used for casts and
/// `sizeof`-style type values.
pub fn render_decl(ctx: &Context, ty: &Type, core: &str) -> String {
    let (prefix, core) = build(ctx, ty, core.to_string());
    if core.is_empty() {
        prefix
    } else {
        format!("{prefix} {core}")
    }
}

/// `render_decl` with no name at all, for a bare type spelling.
pub fn render_type_only(ctx: &Context, ty: &Type) -> String {
    render_decl(ctx, ty, "")
}

fn build(ctx: &Context, ty: &Type, core: String) -> (String, String) {
    match ty.kind() {
        TypeKind::Ptr(base) => build(ctx, base, format!("*{core}")),
        TypeKind::Array(base, len) => {
            let wrapped = parenthesize_if_ptr(core);
            let suffix = match len {
                Some(n) => format!("{wrapped}[{n}]"),
                None => format!("{wrapped}[]"),
            };
            build(ctx, base, suffix)
        }
        TypeKind::Fun(ret, params, variadic) => {
            let wrapped = parenthesize_if_ptr(core);
            let mut parts: Vec<String> = params
                .iter()
                .map(|p| {
                    let pname = if p.name == circ_core::name::CirName::dummy() { String::new() } else { ctx.names.resolve(p.name).to_string() };
                    render_decl(ctx, &p.ty, &pname)
                })
                .collect();
            if *variadic {
                parts.push("...".to_string());
            }
            if parts.is_empty() {
                parts.push("void".to_string());
            }
            let suffix = format!("{wrapped}({})", parts.join(", "));
            build(ctx, ret, suffix)
        }
        _ => (base_type_name(ctx, ty), core),
    }
}

/// Wrap `core` in parens before an array/function suffix binds to it if it
/// already denotes a pointer (`*core`), so `int (*x)[4]` doesn't become the
/// unrelated `int *x[4]`.
fn parenthesize_if_ptr(core: String) -> String {
    if core.starts_with('*') {
        format!("({core})")
    } else {
        core
    }
}

fn base_type_name(ctx: &Context, ty: &Type) -> String {
    match ty.kind() {
        TypeKind::Void => "void".to_string(),
        TypeKind::Int(k) => ikind_name(*k).to_string(),
        TypeKind::Float(k) => fkind_name(*k).to_string(),
        TypeKind::Named(tid) => names::typedef_name(ctx, *tid),
        TypeKind::Comp(cid) => {
            let c = ctx.comps.get(*cid);
            let kw = if c.is_struct { "struct" } else { "union" };
            format!("{kw} {}", names::comp_name(ctx, *cid))
        }
        TypeKind::Enum(eid) => format!("enum {}", names::enum_name(ctx, *eid)),
        TypeKind::VaList => "__builtin_va_list".to_string(),
        TypeKind::Ptr(..) | TypeKind::Array(..) | TypeKind::Fun(..) => {
            unreachable!("handled by build() before reaching a leaf")
        }
    }
}

fn ikind_name(k: IKind) -> &'static str {
    match k {
        IKind::Char => "char",
        IKind::SChar => "signed char",
        IKind::UChar => "unsigned char",
        IKind::Bool => "_Bool",
        IKind::Int => "int",
        IKind::UInt => "unsigned int",
        IKind::Short => "short",
        IKind::UShort => "unsigned short",
        IKind::Long => "long",
        IKind::ULong => "unsigned long",
        IKind::LongLong => "long long",
        IKind::ULongLong => "unsigned long long",
    }
}

fn fkind_name(k: FKind) -> &'static str {
    match k {
        FKind::Float => "float",
        FKind::Double => "double",
        FKind::LongDouble => "long double",
        FKind::F128 => "__float128",
    }
}
