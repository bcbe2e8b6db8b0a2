//! Renders a `circ_core::Context`'s IR back to compilable C (§6 "Renderer
//! output"). The IR is already fully lowered to three-address statements
//! with explicit `Cmp`/`Goto` by the time rendering happens, so this is a
//! transcription, not a decompiler: it never reconstructs `if`/`while`/`for`
//! from the jump graph, only the literal goto-based form the builder left
//! behind.
//!
//! Emission runs in four flat phases — composite bodies, enum bodies,
//! typedefs, then variables (prototypes and data declarations before
//! function bodies) — rather than trying to preserve the source's original
//! declaration order. Composite bodies are the only phase with a real
//! ordering constraint (a by-value nested field needs its comp fully
//! defined first); every comp also gets a forward declaration directly
//! ahead of its own definition regardless of whether anything actually
//! requires it, which trivially covers self- and mutually-recursive tags
//! (§8 scenario 4) without needing cycle detection.

mod body;
mod names;
mod ty;

use std::collections::HashSet;

use circ_core::arena::Handle;
use circ_core::comp::Comp;
use circ_core::context::Context;
use circ_core::types::{Type, TypeKind};
use circ_core::var::{Storage, Var};

pub fn render(ctx: &Context) -> String {
    let mut out = String::new();
    render_comps(ctx, &mut out);
    render_enums(ctx, &mut out);
    render_typedefs(ctx, &mut out);

    let mut protos = String::new();
    let mut globals = String::new();
    let mut bodies = String::new();
    for (h, v) in ctx.vars.iter() {
        if !v.is_global() {
            continue;
        }
        let Some(ty) = v.ty.clone() else { continue };
        if ty.is_fun() {
            protos.push_str(&render_prototype(ctx, h, v, &ty));
            if v.body.is_some() {
                bodies.push_str(&body::render_function_def(ctx, h, v, &ty));
            }
        } else {
            globals.push_str(&render_global(ctx, h, v, &ty));
        }
    }

    out.push_str(&protos);
    if !protos.is_empty() {
        out.push('\n');
    }
    out.push_str(&globals);
    if !globals.is_empty() {
        out.push('\n');
    }
    out.push_str(&bodies);
    out
}

fn render_comps(ctx: &Context, out: &mut String) {
    let mut defined = HashSet::new();
    let handles: Vec<Handle<Comp>> = ctx.comps.iter().map(|(h, _)| h).collect();
    for h in handles {
        render_comp(ctx, h, &mut defined, out);
    }
}

fn render_comp(ctx: &Context, h: Handle<Comp>, defined: &mut HashSet<Handle<Comp>>, out: &mut String) {
    if defined.contains(&h) {
        return;
    }
    let comp = ctx.comps.get(h);
    if !comp.is_defined {
        return;
    }
    for field in &comp.fields {
        if let Some(inner) = by_value_comp_dependency(ctx, &field.ty) {
            if inner != h {
                render_comp(ctx, inner, defined, out);
            }
        }
    }
    defined.insert(h);

    let kw = if comp.is_struct { "struct" } else { "union" };
    let name = names::comp_name(ctx, h);
    out.push_str(&format!("{kw} {name};\n"));
    out.push_str(&format!("{kw} {name} {{\n"));
    for field in &comp.fields {
        let decl = ty::render_decl(ctx, &field.ty, ctx.names.resolve(field.name));
        match field.bitwidth {
            Some(w) => out.push_str(&format!("    {decl} : {w};\n")),
            None => out.push_str(&format!("    {decl};\n")),
        }
    }
    out.push_str("};\n\n");
}

/// A field's type requires `id`'s full definition (not just a forward
/// declaration) when it embeds the comp by value, directly or through an
/// array — a pointer anywhere along the way only ever needs the tag to
/// exist, which the self-forward-declare above always provides.
fn by_value_comp_dependency(ctx: &Context, ty: &Type) -> Option<Handle<Comp>> {
    match ctx.unroll(ty).kind() {
        TypeKind::Comp(id) => Some(*id),
        TypeKind::Array(base, _) => by_value_comp_dependency(ctx, base),
        _ => None,
    }
}

fn render_enums(ctx: &Context, out: &mut String) {
    for (h, e) in ctx.enums.iter() {
        if !e.is_defined {
            continue;
        }
        let name = names::enum_name(ctx, h);
        out.push_str(&format!("enum {name} {{\n"));
        for &item_h in &e.items {
            let item = ctx.enum_items.get(item_h);
            out.push_str(&format!("    {} = {},\n", ctx.names.resolve(item.name), item.value));
        }
        out.push_str("};\n\n");
    }
}

fn render_typedefs(ctx: &Context, out: &mut String) {
    for (h, _) in ctx.typedefs.iter() {
        let t = ctx.typedefs.get(h);
        let name = names::typedef_name(ctx, h);
        out.push_str(&format!("typedef {};\n", ty::render_decl(ctx, &t.ty, &name)));
    }
    if ctx.typedefs.len() > 0 {
        out.push('\n');
    }
}

fn render_prototype(ctx: &Context, h: Handle<Var>, v: &Var, ty: &Type) -> String {
    let name = names::var_name(ctx, h);
    let decl = ty::render_decl(ctx, ty, &name);
    let prefix = if v.storage == Storage::Static { "static " } else { "" };
    format!("{prefix}{decl};\n")
}

fn render_global(ctx: &Context, h: Handle<Var>, v: &Var, ty: &Type) -> String {
    let name = names::var_name(ctx, h);
    let decl = ty::render_decl(ctx, ty, &name);
    let prefix = match v.storage {
        Storage::Static => "static ",
        Storage::Extern => "extern ",
        _ => "",
    };
    match &v.init {
        Some(val) => format!("{prefix}{decl} = {};\n", body::render_const_value(ctx, val)),
        None => format!("{prefix}{decl};\n"),
    }
}
