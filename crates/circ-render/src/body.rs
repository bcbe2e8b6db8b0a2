//! Function body rendering: walks a `Code`'s statement linked list and
//! turns each already-lowered three-address `StmtKind` into literal
//! goto/cmp-based C text (§8 scenario 2 expects exactly one `cmp`-style
//! conditional per short-circuited operand, which only holds if this stays
//! a direct transcription of the IR rather than reconstructing structured
//! `if`/`while`).

use std::collections::{HashMap, HashSet};

use circ_core::arena::Handle;
use circ_core::context::Context;
use circ_core::op::{BinOp, CondOp, UnOp};
use circ_core::stmt::{Stmt, StmtKind};
use circ_core::types::{Type, TypeKind};
use circ_core::value::{Value, ValueKind};
use circ_core::var::Var;

use crate::names;
use crate::ty;

pub fn render_function_def(ctx: &Context, h: Handle<Var>, v: &Var, ty: &Type) -> String {
    let (ret, variadic) = match ty.kind() {
        TypeKind::Fun(ret, _, variadic) => (ret.clone(), *variadic),
        _ => unreachable!("render_function_def called on a non-function var"),
    };

    let mut params: Vec<String> =
        v.formals.iter().map(|&fh| param_decl(ctx, fh)).collect();
    if variadic {
        params.push("...".to_string());
    }
    if params.is_empty() {
        params.push("void".to_string());
    }

    let name = names::var_name(ctx, h);
    let header = crate::ty::render_decl(ctx, &ret, &format!("{name}({})", params.join(", ")));
    let prefix = if v.storage == circ_core::var::Storage::Static { "static " } else { "" };

    let mut out = format!("{prefix}{header} {{\n");
    out.push_str(&render_body(ctx, v));
    out.push_str("}\n\n");
    out
}

fn param_decl(ctx: &Context, h: Handle<Var>) -> String {
    let v = ctx.vars.get(h);
    let pty = v.ty.clone().unwrap_or_else(Type::void);
    ty::render_decl(ctx, &pty, &names::var_name(ctx, h))
}

fn render_body(ctx: &Context, v: &Var) -> String {
    let body = v.body;
    let first = ctx.code.get(body).first;
    let labels = collect_jump_targets(ctx, first);

    let mut out = String::new();
    for h in collect_locals(ctx, first, &v.formals) {
        let ty = ctx.vars.get(h).ty.clone().unwrap_or_else(Type::void);
        out.push_str(&format!("    {};\n", crate::ty::render_decl(ctx, &ty, &names::var_name(ctx, h))));
    }

    let mut cur = first;
    while cur.is_some() {
        if let Some(label) = labels.get(&cur) {
            out.push_str(&format!("{label}:;\n"));
        }
        let line = render_stmt(ctx, &ctx.stmt(cur).kind, &labels);
        if !line.is_empty() {
            out.push_str("    ");
            out.push_str(&line);
            out.push('\n');
        }
        cur = ctx.stmt(cur).next;
    }
    out
}

/// Assign every distinct jump target a sequential label, in the order its
/// referencing `Cmp`/`Goto` is first encountered walking the chain.
fn collect_jump_targets(ctx: &Context, first: Handle<Stmt>) -> HashMap<Handle<Stmt>, String> {
    let mut map = HashMap::new();
    let mut next_id = 0usize;
    let mut cur = first;
    while cur.is_some() {
        if let Some(target) = ctx.stmt(cur).jump_target() {
            map.entry(target).or_insert_with(|| {
                let id = next_id;
                next_id += 1;
                format!("L{id}")
            });
        }
        cur = ctx.stmt(cur).next;
    }
    map
}

/// Every non-global variable a function's statements touch, minus its own
/// formals (already declared by the parameter list), sorted by handle for
/// a deterministic declaration order.
fn collect_locals(ctx: &Context, first: Handle<Stmt>, formals: &[Handle<Var>]) -> Vec<Handle<Var>> {
    let mut set: HashSet<Handle<Var>> = HashSet::new();
    let mut cur = first;
    while cur.is_some() {
        collect_vars_in_kind(&ctx.stmt(cur).kind, &mut set);
        cur = ctx.stmt(cur).next;
    }
    for f in formals {
        set.remove(f);
    }
    let mut locals: Vec<Handle<Var>> = set.into_iter().filter(|h| !ctx.vars.get(*h).is_global()).collect();
    locals.sort_by_key(|h| h.raw());
    locals
}

fn collect_vars_in_kind(kind: &StmtKind, out: &mut HashSet<Handle<Var>>) {
    let push = |v: &Value, out: &mut HashSet<Handle<Var>>| {
        if v.is_lval() {
            out.insert(v.get_var());
        }
    };
    match kind {
        StmtKind::Nop | StmtKind::Label { .. } | StmtKind::GotoLabel { .. } | StmtKind::Goto { .. } | StmtKind::User { .. } => {}
        StmtKind::UnOp { dst, operand, .. } => {
            push(dst, out);
            push(operand, out);
        }
        StmtKind::BinOp { dst, lhs, rhs, .. } => {
            push(dst, out);
            push(lhs, out);
            push(rhs, out);
        }
        StmtKind::Call { dst, target, args } => {
            push(dst, out);
            push(target, out);
            for a in args.iter() {
                push(a, out);
            }
        }
        StmtKind::Return { value } => {
            if let Some(v) = value {
                push(v, out);
            }
        }
        StmtKind::Cmp { lhs, rhs, .. } => {
            push(lhs, out);
            push(rhs, out);
        }
    }
}

fn render_stmt(ctx: &Context, kind: &StmtKind, labels: &HashMap<Handle<Stmt>, String>) -> String {
    match kind {
        StmtKind::Nop => String::new(),
        StmtKind::UnOp { dst, op, operand } => {
            format!("{} = {}{};", render_value(ctx, dst), unop_str(*op), render_value(ctx, operand))
        }
        StmtKind::BinOp { dst, op, lhs, rhs } => {
            format!("{} = {} {} {};", render_value(ctx, dst), render_value(ctx, lhs), binop_str(*op), render_value(ctx, rhs))
        }
        StmtKind::Call { dst, target, args } => {
            let args_str = args.iter().map(|a| render_value(ctx, a)).collect::<Vec<_>>().join(", ");
            let call = format!("{}({args_str})", render_value(ctx, target));
            if call_is_void(ctx, target) {
                format!("{call};")
            } else {
                format!("{} = {call};", render_value(ctx, dst))
            }
        }
        StmtKind::Return { value } => match value {
            Some(v) => format!("return {};", render_value(ctx, v)),
            None => "return;".to_string(),
        },
        StmtKind::Cmp { op, lhs, rhs, target } => {
            let label = labels.get(target).map(String::as_str).unwrap_or("L?");
            format!("if ({} {} {}) goto {label};", render_value(ctx, lhs), condop_str(*op), render_value(ctx, rhs))
        }
        StmtKind::Goto { target } => {
            let label = labels.get(target).map(String::as_str).unwrap_or("L?");
            format!("goto {label};")
        }
        StmtKind::Label { name } => format!("{}:;", ctx.names.resolve(*name)),
        StmtKind::GotoLabel { name } => format!("goto {};", ctx.names.resolve(*name)),
        StmtKind::User { uid, .. } => format!("/* unexpanded user statement (uid {uid}) */;"),
    }
}

fn call_is_void(ctx: &Context, target: &Value) -> bool {
    match fn_type_of(ctx, target) {
        Some(t) => matches!(t.kind(), TypeKind::Fun(ret, _, _) if ret.is_void()),
        None => false,
    }
}

fn fn_type_of(ctx: &Context, v: &Value) -> Option<Type> {
    if let Some(t) = v.get_cast_type() {
        return Some(t.clone());
    }
    match v.kind() {
        ValueKind::Var(h, fields) if fields.is_empty() => ctx.vars.get(*h).ty.clone(),
        ValueKind::Mem(h, fields) if fields.is_empty() => ctx.vars.get(*h).ty.clone().and_then(|t| t.base_type().cloned()),
        _ => None,
    }
}

/// Render a value standing alone, outside any statement — used for a
/// global's constant initializer.
pub fn render_const_value(ctx: &Context, v: &Value) -> String {
    render_value(ctx, v)
}

fn render_value(ctx: &Context, v: &Value) -> String {
    let rendered = match v.kind() {
        ValueKind::Int(k, n) => {
            let suffix = int_suffix(*k);
            format!("{n}{suffix}")
        }
        ValueKind::Str(bytes) => render_c_string(bytes),
        ValueKind::Var(h, fields) => render_lvalue(ctx, names::var_name(ctx, *h), fields),
        ValueKind::Mem(h, fields) => render_lvalue(ctx, format!("(*{})", names::var_name(ctx, *h)), fields),
        ValueKind::User(uid, _) => format!("/* unexpanded user value (uid {uid}) */0"),
        ValueKind::Type(t) => ty::render_type_only(ctx, t),
        ValueKind::Builtin(id) => builtin_spelling(*id).to_string(),
    };
    match v.get_cast_type() {
        Some(t) => format!("(({}){rendered})", ty::render_type_only(ctx, t)),
        None => rendered,
    }
}

fn render_lvalue(ctx: &Context, base: String, fields: &[circ_core::name::CirName]) -> String {
    let mut s = base;
    for f in fields {
        s.push('.');
        s.push_str(ctx.names.resolve(*f));
    }
    s
}

fn int_suffix(k: circ_core::machine::IKind) -> &'static str {
    use circ_core::machine::IKind::*;
    match k {
        UInt | UShort | UChar | Bool => "u",
        Long => "l",
        ULong => "ul",
        LongLong => "ll",
        ULongLong => "ull",
        Char | SChar | Short | Int => "",
    }
}

fn render_c_string(bytes: &[u8]) -> String {
    let mut s = String::from("\"");
    for &b in bytes {
        match b {
            b'\\' => s.push_str("\\\\"),
            b'"' => s.push_str("\\\""),
            b'\n' => s.push_str("\\n"),
            b'\t' => s.push_str("\\t"),
            b'\r' => s.push_str("\\r"),
            0x20..=0x7e => s.push(b as char),
            _ => s.push_str(&format!("\\x{b:02x}")),
        }
    }
    s.push('"');
    s
}

fn unop_str(op: UnOp) -> &'static str {
    match op {
        UnOp::Neg => "-",
        UnOp::BNot => "~",
        UnOp::LNot => "!",
        UnOp::AddrOf => "&",
        UnOp::Identity => "",
    }
}

fn binop_str(op: BinOp) -> &'static str {
    match op {
        BinOp::Plus => "+",
        BinOp::Minus => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::ShiftLt => "<<",
        BinOp::ShiftRt => ">>",
        BinOp::BAnd => "&",
        BinOp::BXor => "^",
        BinOp::BOr => "|",
    }
}

fn condop_str(op: CondOp) -> &'static str {
    match op {
        CondOp::Lt => "<",
        CondOp::Gt => ">",
        CondOp::Le => "<=",
        CondOp::Ge => ">=",
        CondOp::Eq => "==",
        CondOp::Ne => "!=",
    }
}

/// Mirrors `circ_core::builtin`'s private spelling table; duplicated here
/// since the renderer only needs the three literal spellings, not the
/// lookup-by-name direction the core crate exposes.
fn builtin_spelling(id: circ_core::builtin::BuiltinId) -> &'static str {
    use circ_core::builtin::BuiltinId::*;
    match id {
        Bswap16 => "__builtin_bswap16",
        Bswap32 => "__builtin_bswap32",
        Bswap64 => "__builtin_bswap64",
    }
}
