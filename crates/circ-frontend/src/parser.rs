//! Recursive-descent parser: walks tokens straight into `circ-core` IR,
//! threading a single "current block" handle through every statement and
//! expression production so that short-circuiting, branches, and loops can
//! splice their own self-contained `Code` chains into it as they complete.
//!
//! Built on top of `circ_core::builder`'s split contract: the plain
//! arithmetic builders (`build_binop`, `build_unop`, `to_expr`) emit
//! directly onto whatever `owner` they're given, while the control-flow
//! builders (`build_relop`, `build_land`/`build_lor`, `build_if`,
//! `build_for`, `build_break`/`build_continue`) hand back a self-contained
//! chain the caller must merge in itself. [`Parser::sequence`] is that
//! merge step, called once after every statement-level construct.

use circ_core::arena::Handle;
use circ_core::builder;
use circ_core::code::Code;
use circ_core::comp::Field;
use circ_core::context::Context;
use circ_core::declare;
use circ_core::enum_::EnumItem;
use circ_core::env::NameBinding;
use circ_core::error::FatalError;
use circ_core::machine::{IKind, Machine};
use circ_core::name::CirName;
use circ_core::op::{BinOp, CondOp, UnOp};
use circ_core::stmt::StmtKind;
use circ_core::typedef::Typedef;
use circ_core::types::{FunParam, Type, TypeKind};
use circ_core::value::{Value, ValueKind};
use circ_core::var::{Storage, Var};
use std::sync::Arc;

use crate::error::{FrontendError, FrontendResult};
use crate::lexer::{IntSuffix, Lexer, Token};

/// Top-level entry point: lex and parse a whole translation unit, returning
/// the populated `Context` ready for lowering or rendering.
pub fn parse_program(src: &str, file_name: &str) -> FrontendResult<Context> {
    let mut parser = Parser::new(src, file_name)?;
    parser.parse_translation_unit()?;
    Ok(parser.into_context())
}

/// Holds the parser's lexer cursor and the `Context` it's building into.
/// Every parsing method that can add statements takes the block it should
/// add them to as an explicit `owner: Handle<Code>` parameter rather than
/// tracking one on `self` — a nested `{...}` body, an if-arm, or a loop body
/// each get their own fresh scratch block for the duration of their parse.
pub struct Parser {
    pub ctx: Context,
    lexer: Lexer,
    code_id_typedef: Handle<Typedef>,
}

impl Parser {
    pub fn new(src: &str, file_name: &str) -> FrontendResult<Parser> {
        let lexer = Lexer::tokenize(src, file_name)?;
        let mut ctx = Context::new(Machine::host());
        let code_id_name = ctx.names.intern("CirCodeId");
        let code_id_typedef = ctx.typedefs.push(Typedef { name: code_id_name, ty: Type::int(IKind::Int) });
        ctx.env.set_local_name(code_id_name, NameBinding::Typedef(code_id_typedef));
        Ok(Parser { ctx, lexer, code_id_typedef })
    }

    pub fn into_context(self) -> Context {
        self.ctx
    }

    pub fn parse_translation_unit(&mut self) -> FrontendResult<()> {
        while !matches!(self.lexer.peek(), Token::Eof) {
            self.parse_external_declaration()?;
        }
        Ok(())
    }

    // ---- location/error plumbing ----------------------------------------

    fn sync_location(&mut self) {
        let loc = self.lexer.location();
        if !self.ctx.locations.0.is_empty() {
            self.ctx.locations.pop();
        }
        self.ctx.locations.push(loc.file, loc.line);
    }

    fn fatal<T>(&mut self, msg: impl Into<String>) -> FrontendResult<T> {
        self.sync_location();
        Err(FrontendError::Fatal(FatalError::new(msg, self.ctx.locations.clone())))
    }

    fn eat(&mut self, tok: Token) -> FrontendResult<()> {
        if *self.lexer.peek() == tok {
            self.lexer.advance();
            Ok(())
        } else {
            let found = self.lexer.peek().clone();
            self.fatal(format!("expected {tok:?}, found {found:?}"))
        }
    }

    fn eat_ident(&mut self) -> FrontendResult<String> {
        match self.lexer.peek().clone() {
            Token::Ident(name) => {
                self.lexer.advance();
                Ok(name)
            }
            other => self.fatal(format!("expected an identifier, found {other:?}")),
        }
    }

    // ---- the two merge primitives ----------------------------------------

    /// Close any of `owner`'s pending false-jumps onto the start of `next`,
    /// then fold `next`'s statements/jump-lists into `owner`. No-op if
    /// `next` is `owner` itself (an expression that never left the owner's
    /// own chain, e.g. a bare arithmetic expression-statement).
    fn sequence(&mut self, owner: Handle<Code>, next: Handle<Code>) {
        if owner == next {
            return;
        }
        builder::redirect_falsejumps_to(&mut self.ctx, owner, next);
        self.ctx.code.append(owner, next);
    }

    /// Materialize `code` into a plain value, merging whatever statement
    /// chain that took (if `code` was a `Cond`) into `owner` on the way.
    fn expr_as_value(&mut self, owner: Handle<Code>, code: Handle<Code>) -> Value {
        let v = builder::to_expr(&mut self.ctx, owner, code);
        self.sequence(owner, code);
        v
    }

    fn code_as_lvalue(&mut self, code: Handle<Code>) -> FrontendResult<Value> {
        if !self.ctx.code.get(code).is_expr() {
            return self.fatal("expected an lvalue");
        }
        let v = self.ctx.code.get(code).value().cloned().expect("Expr code always carries a value");
        if !v.is_lval() {
            return self.fatal("expression is not assignable");
        }
        Ok(v)
    }

    fn new_temp_var(&mut self, owner: Handle<Code>, ty: Type) -> Handle<Var> {
        let v = self.ctx.new_var(owner);
        self.ctx.vars.get_mut(v).ty = Some(ty);
        self.ctx.vars.get_mut(v).storage = Storage::Register;
        v
    }

    fn emit_on(&mut self, owner: Handle<Code>, kind: StmtKind) {
        let sid = self.ctx.code.append_new_stmt(owner);
        self.ctx.stmts_mut().get_mut(sid).kind = kind;
    }

    /// Mirrors `builder::value_type` (private to that module): the type a
    /// value presents as, resolving `Var`/`Mem` through the variable arena.
    /// The grammar never builds a non-empty field chain, so there's nothing
    /// to walk beyond the variable's own declared type.
    fn value_type(&self, v: &Value) -> Type {
        if let Some(t) = v.get_cast_type() {
            return t.clone();
        }
        match v.kind() {
            ValueKind::Var(h, _) => self.ctx.vars.get(*h).ty.clone().unwrap_or_else(Type::void),
            ValueKind::Mem(h, _) => {
                let ptr_ty = self.ctx.vars.get(*h).ty.clone().unwrap_or_else(Type::void);
                ptr_ty.base_type().cloned().unwrap_or(ptr_ty)
            }
            _ => v.raw_type(&self.ctx.machine),
        }
    }

    fn build_assign(&mut self, owner: Handle<Code>, dst: Value, src_code: Handle<Code>) -> Handle<Code> {
        let src_val = self.expr_as_value(owner, src_code);
        let code = self.ctx.code.of_expr(dst.clone());
        let sid = self.ctx.code.append_new_stmt(code);
        self.ctx.stmts_mut().get_mut(sid).kind = StmtKind::UnOp { dst, op: UnOp::Identity, operand: src_val };
        code
    }

    /// `*p`: a plain variable pointer dereferences directly into a `Mem`
    /// value; anything else (a computed address) is first materialized
    /// into a fresh pointer temp.
    fn build_deref(&mut self, owner: Handle<Code>, operand: Handle<Code>) -> Handle<Code> {
        let v = self.expr_as_value(owner, operand);
        match v.kind().clone() {
            ValueKind::Var(h, fields) if fields.is_empty() => self.ctx.code.of_expr(Value::of_mem(h)),
            _ => {
                let ty = self.value_type(&v);
                let tmp = self.new_temp_var(owner, ty);
                self.emit_on(owner, StmtKind::UnOp { dst: Value::of_var(tmp), op: UnOp::Identity, operand: v });
                self.ctx.code.of_expr(Value::of_mem(tmp))
            }
        }
    }

    fn build_incdec(&mut self, owner: Handle<Code>, operand: Handle<Code>, is_inc: bool, is_prefix: bool) -> FrontendResult<Handle<Code>> {
        let lval = self.code_as_lvalue(operand)?;
        let result_val = if is_prefix {
            lval.clone()
        } else {
            let ty = self.value_type(&lval);
            let tmp = self.new_temp_var(owner, ty);
            let save_src = self.ctx.code.of_expr(lval.clone());
            let save = self.build_assign(owner, Value::of_var(tmp), save_src);
            self.sequence(owner, save);
            Value::of_var(tmp)
        };
        let one = self.ctx.code.of_expr(Value::of_i64(IKind::Int, 1));
        let lval_code = self.ctx.code.of_expr(lval.clone());
        let op = if is_inc { BinOp::Plus } else { BinOp::Minus };
        let sum_code = builder::build_binop(&mut self.ctx, owner, op, lval_code, one);
        let assign = self.build_assign(owner, lval, sum_code);
        self.sequence(owner, assign);
        Ok(self.ctx.code.of_expr(result_val))
    }

    // ---- declarations ------------------------------------------------

    fn at_decl_start(&mut self) -> bool {
        match self.lexer.peek() {
            Token::Void | Token::Char | Token::Short | Token::Int | Token::Long | Token::Unsigned | Token::Signed
            | Token::Struct | Token::Union | Token::Enum | Token::Typedef | Token::Static | Token::Extern => true,
            Token::Ident(name) => {
                let name = name.clone();
                let interned = self.ctx.names.intern(&name);
                matches!(self.ctx.env.find_local_name(interned), Some(NameBinding::Typedef(_)))
            }
            _ => false,
        }
    }

    fn looks_like_type_in_parens(&mut self) -> bool {
        match self.lexer.peek_at(1).clone() {
            Token::Void | Token::Char | Token::Short | Token::Int | Token::Long | Token::Unsigned | Token::Signed
            | Token::Struct | Token::Union | Token::Enum => true,
            Token::Ident(name) => {
                let interned = self.ctx.names.intern(&name);
                matches!(self.ctx.env.find_local_name(interned), Some(NameBinding::Typedef(_)))
            }
            _ => false,
        }
    }

    fn parse_decl_specifiers(&mut self) -> FrontendResult<(Type, Storage, bool)> {
        let mut storage = Storage::None;
        let mut is_typedef = false;
        let mut ty: Option<Type> = None;
        let mut unsigned_seen = false;
        let mut signed_seen = false;
        let mut long_count = 0u8;
        let mut int_seen = false;
        let mut short_seen = false;
        let mut char_seen = false;

        loop {
            let plain_int_specifier_seen = char_seen || short_seen || int_seen || long_count > 0 || unsigned_seen || signed_seen;
            match self.lexer.peek().clone() {
                Token::Typedef => {
                    self.lexer.advance();
                    is_typedef = true;
                }
                Token::Static => {
                    self.lexer.advance();
                    storage = Storage::Static;
                }
                Token::Extern => {
                    self.lexer.advance();
                    storage = Storage::Extern;
                }
                // `const` carries no effect on this subset's type algebra; it
                // is accepted and discarded rather than tracked on `Type`.
                Token::Const => {
                    self.lexer.advance();
                }
                Token::Void if ty.is_none() && !plain_int_specifier_seen => {
                    self.lexer.advance();
                    ty = Some(Type::void());
                }
                Token::Char if ty.is_none() => {
                    self.lexer.advance();
                    char_seen = true;
                }
                Token::Short if ty.is_none() => {
                    self.lexer.advance();
                    short_seen = true;
                }
                Token::Int if ty.is_none() => {
                    self.lexer.advance();
                    int_seen = true;
                }
                Token::Long if ty.is_none() => {
                    self.lexer.advance();
                    long_count += 1;
                }
                Token::Unsigned if ty.is_none() => {
                    self.lexer.advance();
                    unsigned_seen = true;
                }
                Token::Signed if ty.is_none() => {
                    self.lexer.advance();
                    signed_seen = true;
                }
                Token::Struct if ty.is_none() && !plain_int_specifier_seen => {
                    ty = Some(self.parse_comp_specifier(true)?);
                }
                Token::Union if ty.is_none() && !plain_int_specifier_seen => {
                    ty = Some(self.parse_comp_specifier(false)?);
                }
                Token::Enum if ty.is_none() && !plain_int_specifier_seen => {
                    ty = Some(self.parse_enum_specifier()?);
                }
                Token::Ident(name) if ty.is_none() && !plain_int_specifier_seen => {
                    let interned = self.ctx.names.intern(&name);
                    match self.ctx.env.find_local_name(interned) {
                        Some(NameBinding::Typedef(tid)) => {
                            self.lexer.advance();
                            ty = Some(Type::named(tid));
                        }
                        _ => break,
                    }
                }
                _ => break,
            }
        }

        let ty = if let Some(t) = ty {
            t
        } else if char_seen {
            Type::int(if unsigned_seen { IKind::UChar } else { IKind::Char })
        } else if short_seen {
            Type::int(if unsigned_seen { IKind::UShort } else { IKind::Short })
        } else if long_count >= 2 {
            Type::int(if unsigned_seen { IKind::ULongLong } else { IKind::LongLong })
        } else if long_count == 1 {
            Type::int(if unsigned_seen { IKind::ULong } else { IKind::Long })
        } else if unsigned_seen || signed_seen || int_seen {
            Type::int(if unsigned_seen { IKind::UInt } else { IKind::Int })
        } else {
            return self.fatal("expected a type specifier");
        };
        Ok((ty, storage, is_typedef))
    }

    fn parse_comp_specifier(&mut self, is_struct: bool) -> FrontendResult<Type> {
        self.lexer.advance();
        let name = match self.lexer.peek().clone() {
            Token::Ident(n) => {
                self.lexer.advance();
                Some(self.ctx.names.intern(&n))
            }
            _ => None,
        };
        self.sync_location();
        let cid = declare::declare_comp(&mut self.ctx, name, is_struct)?;
        if matches!(self.lexer.peek(), Token::LBrace) {
            self.lexer.advance();
            let mut fields = Vec::new();
            while !matches!(self.lexer.peek(), Token::RBrace) {
                let (base_ty, _storage, _is_typedef) = self.parse_decl_specifiers()?;
                loop {
                    let (fname, fty) = self.parse_declarator(base_ty.clone())?;
                    let interned = self.ctx.names.intern(&fname);
                    fields.push(Field { name: interned, ty: fty, bitwidth: None });
                    if matches!(self.lexer.peek(), Token::Comma) {
                        self.lexer.advance();
                        continue;
                    }
                    break;
                }
                self.eat(Token::Semi)?;
            }
            self.eat(Token::RBrace)?;
            self.sync_location();
            declare::define_comp(&mut self.ctx, cid, fields)?;
        }
        Ok(Type::comp(cid))
    }

    fn parse_enum_specifier(&mut self) -> FrontendResult<Type> {
        self.lexer.advance();
        let name = match self.lexer.peek().clone() {
            Token::Ident(n) => {
                self.lexer.advance();
                Some(self.ctx.names.intern(&n))
            }
            _ => None,
        };
        self.sync_location();
        let eid = declare::declare_enum(&mut self.ctx, name)?;
        if matches!(self.lexer.peek(), Token::LBrace) {
            self.lexer.advance();
            let mut items = Vec::new();
            let mut next_value: i64 = 0;
            while !matches!(self.lexer.peek(), Token::RBrace) {
                let item_name = self.eat_ident()?;
                let interned = self.ctx.names.intern(&item_name);
                if matches!(self.lexer.peek(), Token::Eq) {
                    self.lexer.advance();
                    next_value = self.parse_const_expr_i64()?;
                }
                let iid = self.ctx.enum_items.push(EnumItem { name: interned, value: next_value });
                self.ctx.env.set_local_name(interned, NameBinding::EnumItem(iid));
                items.push(iid);
                next_value += 1;
                if matches!(self.lexer.peek(), Token::Comma) {
                    self.lexer.advance();
                    continue;
                }
                break;
            }
            self.eat(Token::RBrace)?;
            self.sync_location();
            declare::define_enum(&mut self.ctx, eid, IKind::Int, items)?;
        }
        Ok(Type::enum_(eid))
    }

    /// A restricted declarator: an optional run of `*`, a name, then at most
    /// one suffix — either one `[N]`/`[]` or one `(params)`. Declarators
    /// that mix the two (arrays of functions, function-pointer groupings)
    /// aren't supported.
    fn parse_declarator(&mut self, base_ty: Type) -> FrontendResult<(String, Type)> {
        let mut ty = base_ty;
        while matches!(self.lexer.peek(), Token::Star) {
            self.lexer.advance();
            ty = Type::ptr(ty);
        }
        let name = self.eat_ident()?;
        if matches!(self.lexer.peek(), Token::LBracket) {
            self.lexer.advance();
            let len = if matches!(self.lexer.peek(), Token::RBracket) {
                None
            } else {
                Some(self.parse_const_expr_i64()? as u32)
            };
            self.eat(Token::RBracket)?;
            ty = Type::array(ty, len);
        } else if matches!(self.lexer.peek(), Token::LParen) {
            let (params, is_variadic) = self.parse_param_list()?;
            ty = Type::fun(ty, params, is_variadic);
        }
        Ok((name, ty))
    }

    fn parse_param_list(&mut self) -> FrontendResult<(Vec<FunParam>, bool)> {
        self.eat(Token::LParen)?;
        let mut params = Vec::new();
        if matches!(self.lexer.peek(), Token::Void) && matches!(self.lexer.peek_at(1), Token::RParen) {
            self.lexer.advance();
            self.eat(Token::RParen)?;
            return Ok((params, false));
        }
        if matches!(self.lexer.peek(), Token::RParen) {
            self.lexer.advance();
            return Ok((params, false));
        }
        loop {
            let (base_ty, _storage, _is_typedef) = self.parse_decl_specifiers()?;
            let (pname, pty) = self.parse_declarator(base_ty)?;
            let interned = self.ctx.names.intern(&pname);
            params.push(FunParam { name: interned, ty: pty });
            if matches!(self.lexer.peek(), Token::Comma) {
                self.lexer.advance();
                continue;
            }
            break;
        }
        self.eat(Token::RParen)?;
        Ok((params, false))
    }

    fn parse_external_declaration(&mut self) -> FrontendResult<()> {
        self.sync_location();
        let (base_ty, storage, is_typedef) = self.parse_decl_specifiers()?;
        if matches!(self.lexer.peek(), Token::Semi) {
            self.lexer.advance();
            return Ok(());
        }
        loop {
            let (name, ty) = self.parse_declarator(base_ty.clone())?;
            let interned = self.ctx.names.intern(&name);
            let is_fun = matches!(ty.kind(), TypeKind::Fun(..));
            if is_typedef {
                self.sync_location();
                declare::install_typedef(&mut self.ctx, interned, ty)?;
            } else if is_fun && matches!(self.lexer.peek(), Token::LBrace) {
                let formal_names: Vec<CirName> = match ty.kind() {
                    TypeKind::Fun(_, params, _) => params.iter().map(|p| p.name).collect(),
                    _ => unreachable!(),
                };
                self.sync_location();
                let effective_storage = if storage == Storage::Static { Storage::Static } else { Storage::Extern };
                let func = declare::install_var(&mut self.ctx, Handle::NONE, interned, Some(ty), effective_storage)?;
                self.ctx.env.push_scope();
                let body = self.ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
                self.sync_location();
                declare::define_function(&mut self.ctx, func, &formal_names, body)?;
                let block = self.parse_compound_statement()?;
                // Close out any dangling falsejump left by a trailing
                // else-less `if` (or similar unresolved exit) against a real
                // trailing no-op, so the function body always ends on a
                // statement every backpatch can target instead of an orphan
                // never linked into the chain the renderer walks.
                let epilogue = self.ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
                self.ctx.code.append_new_stmt(epilogue);
                self.sequence(block, epilogue);
                self.sequence(body, block);
                self.ctx.env.pop_scope();
                return Ok(());
            } else {
                self.sync_location();
                let effective_storage = if is_fun && storage == Storage::None { Storage::Extern } else { storage };
                let var = declare::install_var(&mut self.ctx, Handle::NONE, interned, Some(ty), effective_storage)?;
                if matches!(self.lexer.peek(), Token::Eq) {
                    self.lexer.advance();
                    let scratch = self.ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
                    let init_code = self.parse_assignment_expr(scratch)?;
                    let init_val = self.expr_as_value(scratch, init_code);
                    if !matches!(init_val.kind(), ValueKind::Int(..) | ValueKind::Str(..)) {
                        return self.fatal("global initializer must be a constant expression");
                    }
                    self.ctx.vars.get_mut(var).init = Some(init_val);
                }
            }
            if matches!(self.lexer.peek(), Token::Comma) {
                self.lexer.advance();
                continue;
            }
            break;
        }
        self.eat(Token::Semi)?;
        Ok(())
    }

    fn parse_local_declaration(&mut self, owner: Handle<Code>) -> FrontendResult<()> {
        let (base_ty, storage, is_typedef) = self.parse_decl_specifiers()?;
        loop {
            let (name, ty) = self.parse_declarator(base_ty.clone())?;
            let interned = self.ctx.names.intern(&name);
            if is_typedef {
                self.sync_location();
                declare::install_typedef(&mut self.ctx, interned, ty)?;
            } else {
                self.sync_location();
                let var = declare::install_var(&mut self.ctx, owner, interned, Some(ty), storage)?;
                self.ctx.code.get_mut(owner).vars.push(var);
                if matches!(self.lexer.peek(), Token::Eq) {
                    self.lexer.advance();
                    let init = self.parse_assignment_expr(owner)?;
                    let assign = self.build_assign(owner, Value::of_var(var), init);
                    self.sequence(owner, assign);
                }
            }
            if matches!(self.lexer.peek(), Token::Comma) {
                self.lexer.advance();
                continue;
            }
            break;
        }
        self.eat(Token::Semi)?;
        Ok(())
    }

    // ---- statements ------------------------------------------------

    /// Each sibling statement is parsed into its own fresh scratch piece and
    /// only merged into `block` once fully built — never parsed directly
    /// against `block` itself. That's what lets `sequence` close a dangling
    /// falsejump left by an else-less `if` (or an unresolved loop exit) onto
    /// the *next* statement's actual first instruction: `redirect_jump_to`
    /// needs that statement's `Code` already built to know where it starts.
    fn parse_compound_statement(&mut self) -> FrontendResult<Handle<Code>> {
        self.eat(Token::LBrace)?;
        self.ctx.env.push_scope();
        let block = self.ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
        while !matches!(self.lexer.peek(), Token::RBrace) {
            let piece = self.ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
            self.parse_statement(piece)?;
            self.sequence(block, piece);
        }
        self.eat(Token::RBrace)?;
        self.ctx.env.pop_scope();
        Ok(block)
    }

    fn parse_statement_as_block(&mut self) -> FrontendResult<Handle<Code>> {
        if matches!(self.lexer.peek(), Token::LBrace) {
            self.parse_compound_statement()
        } else {
            let block = self.ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
            self.parse_statement(block)?;
            Ok(block)
        }
    }

    fn parse_statement(&mut self, owner: Handle<Code>) -> FrontendResult<()> {
        self.sync_location();
        match self.lexer.peek().clone() {
            Token::LBrace => {
                let block = self.parse_compound_statement()?;
                self.sequence(owner, block);
            }
            Token::If => self.parse_if(owner)?,
            Token::While => self.parse_while(owner)?,
            Token::Do => self.parse_do_while(owner)?,
            Token::For => self.parse_for(owner)?,
            Token::Return => self.parse_return(owner)?,
            Token::Break => {
                self.lexer.advance();
                self.eat(Token::Semi)?;
                self.sync_location();
                let r = builder::build_break(&mut self.ctx, owner)?;
                self.sequence(owner, r);
            }
            Token::Continue => {
                self.lexer.advance();
                self.eat(Token::Semi)?;
                self.sync_location();
                let r = builder::build_continue(&mut self.ctx, owner)?;
                self.sequence(owner, r);
            }
            Token::Semi => {
                self.lexer.advance();
            }
            _ if self.at_decl_start() => {
                self.parse_local_declaration(owner)?;
            }
            _ => {
                let expr = self.parse_assignment_expr(owner)?;
                self.eat(Token::Semi)?;
                // Discard the value but still materialize it: a bare `a > b;`
                // is a `Cond` with its own unresolved jump lists, which a
                // plain `sequence` wouldn't close.
                self.expr_as_value(owner, expr);
            }
        }
        Ok(())
    }

    fn parse_return(&mut self, owner: Handle<Code>) -> FrontendResult<()> {
        self.lexer.advance();
        let value = if matches!(self.lexer.peek(), Token::Semi) {
            None
        } else {
            let expr = self.parse_assignment_expr(owner)?;
            Some(self.expr_as_value(owner, expr))
        };
        self.eat(Token::Semi)?;
        self.emit_on(owner, StmtKind::Return { value });
        Ok(())
    }

    fn parse_if(&mut self, owner: Handle<Code>) -> FrontendResult<()> {
        self.lexer.advance();
        self.eat(Token::LParen)?;
        let cond = self.parse_expression(owner)?;
        self.eat(Token::RParen)?;
        let then_block = self.parse_statement_as_block()?;
        let else_block = if matches!(self.lexer.peek(), Token::Else) {
            self.lexer.advance();
            Some(self.parse_statement_as_block()?)
        } else {
            None
        };
        let whole = builder::build_if(&mut self.ctx, owner, cond, then_block, else_block);
        self.sequence(owner, whole);
        Ok(())
    }

    fn parse_while(&mut self, owner: Handle<Code>) -> FrontendResult<()> {
        self.lexer.advance();
        self.eat(Token::LParen)?;
        // A fresh scratch block, not `owner`: the condition re-evaluates on
        // every iteration, so any side effect it has (a call) must live
        // inside the chain `build_for` splices into the loop body, not on
        // the enclosing statement that only runs once.
        let cond_block = self.ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
        let cond_expr = self.parse_expression(cond_block)?;
        self.sequence(cond_block, cond_expr);
        self.eat(Token::RParen)?;
        let first_stmt = self.ctx.stmts_mut().new_orphan();
        let break_target = builder::enter_loop(&mut self.ctx, first_stmt, None);
        let then_block = self.parse_statement_as_block()?;
        builder::exit_loop(&mut self.ctx);
        let loop_code = builder::build_for(&mut self.ctx, owner, Some(cond_block), first_stmt, then_block, None, None, break_target);
        self.sequence(owner, loop_code);
        Ok(())
    }

    fn parse_for(&mut self, owner: Handle<Code>) -> FrontendResult<()> {
        self.lexer.advance();
        self.eat(Token::LParen)?;
        self.ctx.env.push_scope();
        if matches!(self.lexer.peek(), Token::Semi) {
            self.lexer.advance();
        } else if self.at_decl_start() {
            self.parse_local_declaration(owner)?;
        } else {
            let piece = self.parse_expression(owner)?;
            self.eat(Token::Semi)?;
            self.expr_as_value(owner, piece);
        }
        let cond = if matches!(self.lexer.peek(), Token::Semi) {
            None
        } else {
            // Own scratch block, not `owner`: the test re-runs every
            // iteration, so any side effect it has belongs in the chain
            // `build_for` splices into the loop body, not in code that
            // only runs once before the loop starts.
            let cond_block = self.ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
            let cond_expr = self.parse_expression(cond_block)?;
            self.sequence(cond_block, cond_expr);
            Some(cond_block)
        };
        self.eat(Token::Semi)?;
        let after = if matches!(self.lexer.peek(), Token::RParen) {
            None
        } else {
            let after_block = self.ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
            let result = self.parse_expression(after_block)?;
            self.expr_as_value(after_block, result);
            Some(after_block)
        };
        self.eat(Token::RParen)?;

        let first_stmt = self.ctx.stmts_mut().new_orphan();
        let rest_stmt = self.ctx.stmts_mut().new_orphan();
        let break_target = builder::enter_loop(&mut self.ctx, first_stmt, Some(rest_stmt));
        let then_block = self.parse_statement_as_block()?;
        builder::exit_loop(&mut self.ctx);
        self.ctx.env.pop_scope();

        let loop_code = builder::build_for(&mut self.ctx, owner, cond, first_stmt, then_block, after, Some(rest_stmt), break_target);
        self.sequence(owner, loop_code);
        Ok(())
    }

    /// `do body while (cond);`: the test runs after the body, always
    /// executing it at least once, so this can't reuse `build_for` (which
    /// always tests first) — the true-jump loops back to the body's start,
    /// and the false-jump is manually retargeted onto `break_target` since
    /// there's no enclosing `Code` to hand `redirect_falsejumps_to`.
    fn parse_do_while(&mut self, owner: Handle<Code>) -> FrontendResult<()> {
        self.lexer.advance();
        let loop_code = self.ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
        let first_stmt = self.ctx.stmts_mut().new_orphan();
        self.ctx.code.append_orphan_stmt(loop_code, first_stmt);
        let break_target = builder::enter_loop(&mut self.ctx, first_stmt, None);
        let then_block = self.parse_statement_as_block()?;
        builder::exit_loop(&mut self.ctx);
        self.ctx.code.append(loop_code, then_block);

        self.eat(Token::While)?;
        self.eat(Token::LParen)?;
        let cond = self.parse_expression(loop_code)?;
        self.eat(Token::RParen)?;
        self.eat(Token::Semi)?;

        let goto_first = self.ctx.code.of_expr(Value::of_i64(IKind::Int, 0));
        self.emit_on(goto_first, StmtKind::Goto { target: first_stmt });
        let whole = builder::build_if(&mut self.ctx, loop_code, cond, goto_first, None);
        let dangling = std::mem::take(&mut self.ctx.code.get_mut(whole).falsejumps);
        for sid in dangling {
            self.ctx.stmts_mut().get_mut(sid).set_jump_target(break_target);
        }
        self.sequence(loop_code, whole);
        self.ctx.code.append_orphan_stmt(loop_code, break_target);

        self.sequence(owner, loop_code);
        Ok(())
    }

    // ---- expressions ------------------------------------------------

    fn parse_expression(&mut self, owner: Handle<Code>) -> FrontendResult<Handle<Code>> {
        self.parse_assignment_expr(owner)
    }

    fn parse_const_expr_i64(&mut self) -> FrontendResult<i64> {
        let code = self.parse_logical_or_expr(Handle::NONE)?;
        let v = self.ctx.code.get(code).value().cloned().expect("a constant expression never produces a Cond");
        if v.is_int() {
            Ok(v.get_i64())
        } else {
            self.fatal("expected a constant integer expression")
        }
    }

    fn parse_assignment_expr(&mut self, owner: Handle<Code>) -> FrontendResult<Handle<Code>> {
        let lhs = self.parse_logical_or_expr(owner)?;
        let compound_op = match self.lexer.peek() {
            Token::Eq => None,
            Token::PlusEq => Some(BinOp::Plus),
            Token::MinusEq => Some(BinOp::Minus),
            Token::StarEq => Some(BinOp::Mul),
            Token::SlashEq => Some(BinOp::Div),
            Token::PercentEq => Some(BinOp::Mod),
            Token::AndEq => Some(BinOp::BAnd),
            Token::OrEq => Some(BinOp::BOr),
            Token::XorEq => Some(BinOp::BXor),
            Token::ShlEq => Some(BinOp::ShiftLt),
            Token::ShrEq => Some(BinOp::ShiftRt),
            _ => return Ok(lhs),
        };
        self.lexer.advance();
        self.sync_location();
        let dst = self.code_as_lvalue(lhs)?;
        let rhs = self.parse_assignment_expr(owner)?;
        let value_code = match compound_op {
            None => rhs,
            Some(op) => {
                let dst_code = self.ctx.code.of_expr(dst.clone());
                builder::build_binop(&mut self.ctx, owner, op, dst_code, rhs)
            }
        };
        let assign = self.build_assign(owner, dst, value_code);
        self.sequence(owner, assign);
        Ok(assign)
    }

    fn parse_logical_or_expr(&mut self, owner: Handle<Code>) -> FrontendResult<Handle<Code>> {
        let mut lhs = self.parse_logical_and_expr(owner)?;
        while matches!(self.lexer.peek(), Token::OrOr) {
            self.lexer.advance();
            let rhs = self.parse_logical_and_expr(owner)?;
            lhs = builder::build_lor(&mut self.ctx, owner, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_logical_and_expr(&mut self, owner: Handle<Code>) -> FrontendResult<Handle<Code>> {
        let mut lhs = self.parse_bit_or_expr(owner)?;
        while matches!(self.lexer.peek(), Token::AndAnd) {
            self.lexer.advance();
            let rhs = self.parse_bit_or_expr(owner)?;
            lhs = builder::build_land(&mut self.ctx, owner, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_bit_or_expr(&mut self, owner: Handle<Code>) -> FrontendResult<Handle<Code>> {
        let mut lhs = self.parse_bit_xor_expr(owner)?;
        while matches!(self.lexer.peek(), Token::Pipe) {
            self.lexer.advance();
            let rhs = self.parse_bit_xor_expr(owner)?;
            lhs = builder::build_binop(&mut self.ctx, owner, BinOp::BOr, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_bit_xor_expr(&mut self, owner: Handle<Code>) -> FrontendResult<Handle<Code>> {
        let mut lhs = self.parse_bit_and_expr(owner)?;
        while matches!(self.lexer.peek(), Token::Caret) {
            self.lexer.advance();
            let rhs = self.parse_bit_and_expr(owner)?;
            lhs = builder::build_binop(&mut self.ctx, owner, BinOp::BXor, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_bit_and_expr(&mut self, owner: Handle<Code>) -> FrontendResult<Handle<Code>> {
        let mut lhs = self.parse_equality_expr(owner)?;
        while matches!(self.lexer.peek(), Token::Amp) {
            self.lexer.advance();
            let rhs = self.parse_equality_expr(owner)?;
            lhs = builder::build_binop(&mut self.ctx, owner, BinOp::BAnd, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_equality_expr(&mut self, owner: Handle<Code>) -> FrontendResult<Handle<Code>> {
        let mut lhs = self.parse_relational_expr(owner)?;
        loop {
            let op = match self.lexer.peek() {
                Token::EqEq => CondOp::Eq,
                Token::Ne => CondOp::Ne,
                _ => break,
            };
            self.lexer.advance();
            let rhs = self.parse_relational_expr(owner)?;
            lhs = builder::build_relop(&mut self.ctx, owner, op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_relational_expr(&mut self, owner: Handle<Code>) -> FrontendResult<Handle<Code>> {
        let mut lhs = self.parse_shift_expr(owner)?;
        loop {
            let op = match self.lexer.peek() {
                Token::Lt => CondOp::Lt,
                Token::Gt => CondOp::Gt,
                Token::Le => CondOp::Le,
                Token::Ge => CondOp::Ge,
                _ => break,
            };
            self.lexer.advance();
            let rhs = self.parse_shift_expr(owner)?;
            lhs = builder::build_relop(&mut self.ctx, owner, op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_shift_expr(&mut self, owner: Handle<Code>) -> FrontendResult<Handle<Code>> {
        let mut lhs = self.parse_additive_expr(owner)?;
        loop {
            let op = match self.lexer.peek() {
                Token::Shl => BinOp::ShiftLt,
                Token::Shr => BinOp::ShiftRt,
                _ => break,
            };
            self.lexer.advance();
            let rhs = self.parse_additive_expr(owner)?;
            lhs = builder::build_binop(&mut self.ctx, owner, op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_additive_expr(&mut self, owner: Handle<Code>) -> FrontendResult<Handle<Code>> {
        let mut lhs = self.parse_multiplicative_expr(owner)?;
        loop {
            let op = match self.lexer.peek() {
                Token::Plus => BinOp::Plus,
                Token::Minus => BinOp::Minus,
                _ => break,
            };
            self.lexer.advance();
            let rhs = self.parse_multiplicative_expr(owner)?;
            lhs = builder::build_binop(&mut self.ctx, owner, op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_multiplicative_expr(&mut self, owner: Handle<Code>) -> FrontendResult<Handle<Code>> {
        let mut lhs = self.parse_unary_expr(owner)?;
        loop {
            let op = match self.lexer.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.lexer.advance();
            let rhs = self.parse_unary_expr(owner)?;
            lhs = builder::build_binop(&mut self.ctx, owner, op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary_expr(&mut self, owner: Handle<Code>) -> FrontendResult<Handle<Code>> {
        self.sync_location();
        match self.lexer.peek().clone() {
            Token::Minus => {
                self.lexer.advance();
                let operand = self.parse_unary_expr(owner)?;
                Ok(builder::build_unop(&mut self.ctx, owner, UnOp::Neg, operand))
            }
            Token::Plus => {
                self.lexer.advance();
                self.parse_unary_expr(owner)
            }
            Token::Tilde => {
                self.lexer.advance();
                let operand = self.parse_unary_expr(owner)?;
                Ok(builder::build_unop(&mut self.ctx, owner, UnOp::BNot, operand))
            }
            Token::Bang => {
                self.lexer.advance();
                let operand = self.parse_unary_expr(owner)?;
                Ok(builder::build_lnot(&mut self.ctx, owner, operand))
            }
            Token::Star => {
                self.lexer.advance();
                let operand = self.parse_unary_expr(owner)?;
                Ok(self.build_deref(owner, operand))
            }
            Token::PlusPlus => {
                self.lexer.advance();
                let operand = self.parse_unary_expr(owner)?;
                self.build_incdec(owner, operand, true, true)
            }
            Token::MinusMinus => {
                self.lexer.advance();
                let operand = self.parse_unary_expr(owner)?;
                self.build_incdec(owner, operand, false, true)
            }
            Token::Sizeof => {
                self.lexer.advance();
                self.parse_sizeof(owner)
            }
            _ => self.parse_postfix_expr(owner),
        }
    }

    fn parse_sizeof(&mut self, owner: Handle<Code>) -> FrontendResult<Handle<Code>> {
        if matches!(self.lexer.peek(), Token::LParen) && self.looks_like_type_in_parens() {
            self.lexer.advance();
            let (base_ty, _storage, _is_typedef) = self.parse_decl_specifiers()?;
            let mut ty = base_ty;
            while matches!(self.lexer.peek(), Token::Star) {
                self.lexer.advance();
                ty = Type::ptr(ty);
            }
            self.eat(Token::RParen)?;
            let size = self.ctx.sizeof(&ty);
            Ok(self.ctx.code.of_expr(Value::of_i64(IKind::ULong, size as i64)))
        } else {
            let operand = self.parse_unary_expr(owner)?;
            let v = self.expr_as_value(owner, operand);
            let ty = self.value_type(&v);
            let size = self.ctx.sizeof(&ty);
            Ok(self.ctx.code.of_expr(Value::of_i64(IKind::ULong, size as i64)))
        }
    }

    fn parse_postfix_expr(&mut self, owner: Handle<Code>) -> FrontendResult<Handle<Code>> {
        let mut expr = self.parse_primary_expr(owner)?;
        loop {
            match self.lexer.peek().clone() {
                Token::LParen => {
                    let v = self.expr_as_value(owner, expr);
                    let ty = self.value_type(&v);
                    expr = self.parse_call(owner, v, ty)?;
                }
                Token::LBracket => {
                    self.lexer.advance();
                    let index = self.parse_expression(owner)?;
                    self.eat(Token::RBracket)?;
                    let sum = builder::build_binop(&mut self.ctx, owner, BinOp::Plus, expr, index);
                    expr = self.build_deref(owner, sum);
                }
                Token::PlusPlus => {
                    self.lexer.advance();
                    expr = self.build_incdec(owner, expr, true, false)?;
                }
                Token::MinusMinus => {
                    self.lexer.advance();
                    expr = self.build_incdec(owner, expr, false, false)?;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call(&mut self, owner: Handle<Code>, target: Value, target_ty: Type) -> FrontendResult<Handle<Code>> {
        self.eat(Token::LParen)?;
        let mut args = Vec::new();
        if !matches!(self.lexer.peek(), Token::RParen) {
            loop {
                let arg_code = self.parse_assignment_expr(owner)?;
                let arg_val = self.expr_as_value(owner, arg_code);
                args.push(arg_val);
                if matches!(self.lexer.peek(), Token::Comma) {
                    self.lexer.advance();
                    continue;
                }
                break;
            }
        }
        self.eat(Token::RParen)?;
        self.sync_location();
        if args.len() > 6 {
            return self.fatal("a call may pass at most 6 arguments");
        }
        let ret_ty = match target_ty.kind() {
            TypeKind::Fun(ret, _, _) => ret.clone(),
            _ => return self.fatal("called expression is not a function"),
        };
        let dst_ty = if ret_ty.is_void() { Type::int(IKind::Int) } else { ret_ty };
        let dst = self.new_temp_var(owner, dst_ty);
        self.emit_on(owner, StmtKind::Call { dst: Value::of_var(dst), target, args: Arc::from(args) });
        Ok(self.ctx.code.of_expr(Value::of_var(dst)))
    }

    fn parse_primary_expr(&mut self, owner: Handle<Code>) -> FrontendResult<Handle<Code>> {
        let _ = owner;
        self.sync_location();
        match self.lexer.peek().clone() {
            Token::IntLit(v, suffix) => {
                self.lexer.advance();
                Ok(self.ctx.code.of_expr(Value::of_i64(int_suffix_kind(suffix), v)))
            }
            Token::CharLit(v) => {
                self.lexer.advance();
                Ok(self.ctx.code.of_expr(Value::of_i64(IKind::Char, v)))
            }
            Token::StrLit(bytes) => {
                self.lexer.advance();
                Ok(self.ctx.code.of_expr(Value::of_string(bytes)))
            }
            Token::LParen => {
                self.lexer.advance();
                let e = self.parse_expression(owner)?;
                self.eat(Token::RParen)?;
                Ok(e)
            }
            Token::At => {
                self.lexer.advance();
                self.parse_stage_trigger(owner)
            }
            Token::Ident(name) => {
                self.lexer.advance();
                let interned = self.ctx.names.intern(&name);
                match self.ctx.env.find_local_name(interned) {
                    Some(NameBinding::Var(v)) => Ok(self.ctx.code.of_expr(Value::of_var(v))),
                    Some(NameBinding::EnumItem(eid)) => {
                        let val = self.ctx.enum_items.get(eid).value;
                        Ok(self.ctx.code.of_expr(Value::of_i64(IKind::Int, val)))
                    }
                    Some(NameBinding::Typedef(_)) => self.fatal(format!("'{name}' is a type name, not a value")),
                    None => self.fatal(format!("use of undeclared identifier '{name}'")),
                }
            }
            other => self.fatal(format!("unexpected token {other:?} while parsing an expression")),
        }
    }

    /// `@name(args)`: splices a staged fragment in at the call site. The
    /// target function must already be declared and defined (forward
    /// staging isn't supported — a stage trigger can't reference a function
    /// textually later in the same file).
    fn parse_stage_trigger(&mut self, owner: Handle<Code>) -> FrontendResult<Handle<Code>> {
        let _ = owner;
        let name = self.eat_ident()?;
        let interned = self.ctx.names.intern(&name);
        let target = match self.ctx.env.find_global_name(interned) {
            Some(NameBinding::Var(v)) => v,
            _ => return self.fatal(format!("'{name}' is not a known function for a stage trigger")),
        };
        self.eat(Token::LParen)?;
        let mut arg_codes = Vec::new();
        if !matches!(self.lexer.peek(), Token::RParen) {
            loop {
                arg_codes.push(self.parse_assignment_expr(owner)?);
                if matches!(self.lexer.peek(), Token::Comma) {
                    self.lexer.advance();
                    continue;
                }
                break;
            }
        }
        self.eat(Token::RParen)?;
        self.sync_location();
        let result = circ_stage::stage_trigger(&mut self.ctx, self.code_id_typedef, target, &arg_codes)?;
        Ok(result)
    }
}

fn int_suffix_kind(suffix: IntSuffix) -> IKind {
    match (suffix.unsigned, suffix.long_count) {
        (false, 0) => IKind::Int,
        (true, 0) => IKind::UInt,
        (false, _) => IKind::Long,
        (true, _) => IKind::ULong,
    }
}
