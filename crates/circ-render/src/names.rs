//! Synthetic identifier assignment (§6 "Renderer output"): every typedef,
//! comp, and enum gets a stable `tidN_`/`cidN_`/`eidN_` name built from its
//! handle's raw arena index, so two handles never collide even if their
//! original source names did (shadowing, anonymous tags). A variable gets
//! the same `vidN_` treatment *unless* it is a non-static global, in which
//! case the raw name is emitted instead so the linker still sees the symbol
//! it was declared under.

use circ_core::arena::Handle;
use circ_core::comp::Comp;
use circ_core::context::Context;
use circ_core::enum_::Enum;
use circ_core::typedef::Typedef;
use circ_core::var::{Storage, Var};

pub fn var_name(ctx: &Context, h: Handle<Var>) -> String {
    let v = ctx.vars.get(h);
    if v.is_global() && v.storage != Storage::Static {
        ctx.names.resolve(v.name).to_string()
    } else {
        format!("vid{}_{}", h.raw(), ctx.names.resolve(v.name))
    }
}

pub fn typedef_name(ctx: &Context, h: Handle<Typedef>) -> String {
    let t = ctx.typedefs.get(h);
    format!("tid{}_{}", h.raw(), ctx.names.resolve(t.name))
}

pub fn comp_name(ctx: &Context, h: Handle<Comp>) -> String {
    let c = ctx.comps.get(h);
    match c.name {
        Some(n) => format!("cid{}_{}", h.raw(), ctx.names.resolve(n)),
        None => format!("cid{}_", h.raw()),
    }
}

pub fn enum_name(ctx: &Context, h: Handle<Enum>) -> String {
    let e = ctx.enums.get(h);
    match e.name {
        Some(n) => format!("eid{}_{}", h.raw(), ctx.names.resolve(n)),
        None => format!("eid{}_", h.raw()),
    }
}
