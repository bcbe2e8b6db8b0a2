//! `CirCode`: a block of statements plus whatever it evaluates to (§3.8).
//!
//! A `Code` is either an `Expr` block, whose trailing `value` is what the
//! block evaluates to once its statements run, or a `Cond` block, whose
//! statement list ends in jumps recorded on `truejumps`/`falsejumps` —
//! backpatch lists that get pointed at wherever the surrounding control flow
//! eventually lands (§4.2 "Short-circuit lowering").

use crate::arena::Handle;
use crate::stmt::{Stmt, StmtArena};
use crate::value::Value;
use crate::var::Var;

pub enum CodeKind {
    Expr { value: Value },
    Cond,
}

/// `first == Handle::NONE` iff `last == Handle::NONE`: an empty code block
/// has no statements at all, not a dangling endpoint (§3.8 invariant).
pub struct Code {
    pub kind: CodeKind,
    pub first: Handle<Stmt>,
    pub last: Handle<Stmt>,
    pub truejumps: Vec<Handle<Stmt>>,
    pub falsejumps: Vec<Handle<Stmt>>,
    /// Locals declared directly in this block, in declaration order.
    pub vars: Vec<Handle<Var>>,
}

impl Code {
    pub fn dummy() -> Self {
        Code {
            kind: CodeKind::Expr { value: Value::of_i64(crate::machine::IKind::Int, 0) },
            first: Handle::NONE,
            last: Handle::NONE,
            truejumps: Vec::new(),
            falsejumps: Vec::new(),
            vars: Vec::new(),
        }
    }

    pub fn is_expr(&self) -> bool {
        matches!(self.kind, CodeKind::Expr { .. })
    }
    pub fn is_cond(&self) -> bool {
        matches!(self.kind, CodeKind::Cond)
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.kind {
            CodeKind::Expr { value } => Some(value),
            CodeKind::Cond => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        debug_assert_eq!(self.first.is_none(), self.last.is_none());
        self.first.is_none()
    }
}

/// Arena of code blocks plus the statement arena they link into — bundled
/// together because every structural operation on a `Code` (append, new
/// statement, `to_expr`) touches both.
pub struct CodeArena {
    pub(crate) arena: crate::arena::Arena<Code>,
    pub stmts: StmtArena,
}

impl CodeArena {
    pub fn new() -> Self {
        CodeArena { arena: crate::arena::Arena::new(Code::dummy()), stmts: StmtArena::new() }
    }

    pub fn get(&self, h: Handle<Code>) -> &Code {
        self.arena.get(h)
    }
    pub fn get_mut(&mut self, h: Handle<Code>) -> &mut Code {
        self.arena.get_mut(h)
    }

    pub fn of_expr(&mut self, value: Value) -> Handle<Code> {
        self.arena.push(Code {
            kind: CodeKind::Expr { value },
            first: Handle::NONE,
            last: Handle::NONE,
            truejumps: Vec::new(),
            falsejumps: Vec::new(),
            vars: Vec::new(),
        })
    }

    pub fn of_cond(&mut self) -> Handle<Code> {
        self.arena.push(Code {
            kind: CodeKind::Cond,
            first: Handle::NONE,
            last: Handle::NONE,
            truejumps: Vec::new(),
            falsejumps: Vec::new(),
            vars: Vec::new(),
        })
    }

    /// Append a new NOP statement owned by `code` at the end of its list.
    pub fn append_new_stmt(&mut self, code: Handle<Code>) -> Handle<Stmt> {
        let last = self.get(code).last;
        if last.is_none() {
            let sid = self.stmts.new_orphan();
            self.stmts.get_mut(sid).owner = code;
            let c = self.get_mut(code);
            c.first = sid;
            c.last = sid;
            sid
        } else {
            let sid = self.stmts.new_after(last);
            self.get_mut(code).last = sid;
            sid
        }
    }

    pub fn prepend_new_stmt(&mut self, code: Handle<Code>) -> Handle<Stmt> {
        let first = self.get(code).first;
        if first.is_none() {
            self.append_new_stmt(code)
        } else {
            let sid = self.stmts.new_before(first);
            self.get_mut(code).first = sid;
            sid
        }
    }

    /// Move an orphan statement into `code`, at the end.
    pub fn append_orphan_stmt(&mut self, code: Handle<Code>, sid: Handle<Stmt>) {
        debug_assert!(self.stmts.get(sid).is_orphan());
        let last = self.get(code).last;
        self.stmts.get_mut(sid).owner = code;
        if last.is_none() {
            let c = self.get_mut(code);
            c.first = sid;
            c.last = sid;
        } else {
            self.stmts.get_mut(last).next = sid;
            self.stmts.get_mut(sid).prev = last;
            self.get_mut(code).last = sid;
        }
    }

    pub fn add_true_jump(&mut self, code: Handle<Code>, sid: Handle<Stmt>) {
        self.get_mut(code).truejumps.push(sid);
    }
    pub fn add_false_jump(&mut self, code: Handle<Code>, sid: Handle<Stmt>) {
        self.get_mut(code).falsejumps.push(sid);
    }

    /// `CirCode_append`: splice `b`'s statement list onto the end of `a`'s,
    /// transferring ownership of every statement in `b`, and replacing `a`'s
    /// `kind`/jump lists with `b`'s. `b` is left empty; callers must not use
    /// it again.
    pub fn append(&mut self, a: Handle<Code>, b: Handle<Code>) {
        let b_first = self.get(b).first;
        let b_last = self.get(b).last;
        if !b_first.is_none() {
            let mut cur = b_first;
            loop {
                self.stmts.get_mut(cur).owner = a;
                let next = self.stmts.get(cur).next;
                if next.is_none() {
                    break;
                }
                cur = next;
            }
            let a_last = self.get(a).last;
            if a_last.is_none() {
                self.get_mut(a).first = b_first;
            } else {
                self.stmts.get_mut(a_last).next = b_first;
                self.stmts.get_mut(b_first).prev = a_last;
            }
            self.get_mut(a).last = b_last;
        }
        let b_kind_is_expr = self.get(b).is_expr();
        let b_value = if b_kind_is_expr { self.get(b).value().cloned() } else { None };
        let b_true = std::mem::take(&mut self.get_mut(b).truejumps);
        let b_false = std::mem::take(&mut self.get_mut(b).falsejumps);
        let a_mut = self.get_mut(a);
        a_mut.kind = match b_value {
            Some(v) => CodeKind::Expr { value: v },
            None => CodeKind::Cond,
        };
        a_mut.truejumps = b_true;
        a_mut.falsejumps = b_false;
        let bc = self.get_mut(b);
        bc.first = Handle::NONE;
        bc.last = Handle::NONE;
    }

    /// `CirCode_toExpr`: materialize a `Cond` block into an `Expr` by
    /// allocating a fresh temp, patching every pending true/false jump to
    /// assign `1`/`0` into it, and appending a trailing label the jumps
    /// fall through to (§4.3 "Cond to Expr"). Patching is left to the
    /// builder, which owns variable and label allocation; this just clears
    /// the backpatch lists and installs the value.
    pub fn to_expr_value(&mut self, code: Handle<Code>, value: Value) {
        debug_assert!(self.get(code).is_cond());
        self.get_mut(code).truejumps.clear();
        self.get_mut(code).falsejumps.clear();
        self.get_mut(code).kind = CodeKind::Expr { value };
    }
}

impl Default for CodeArena {
    fn default() -> Self {
        CodeArena::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::IKind;

    #[test]
    fn append_transfers_statement_ownership() {
        let mut codes = CodeArena::new();
        let a = codes.of_expr(Value::of_i64(IKind::Int, 0));
        let b = codes.of_expr(Value::of_i64(IKind::Int, 1));
        let s1 = codes.append_new_stmt(a);
        let s2 = codes.append_new_stmt(b);
        codes.append(a, b);
        assert_eq!(codes.stmts.get(s2).owner, a);
        assert_eq!(codes.stmts.get(s1).next, s2);
        assert!(codes.get(b).is_empty());
    }

    #[test]
    fn empty_code_has_no_endpoints() {
        let mut codes = CodeArena::new();
        let c = codes.of_expr(Value::of_i64(IKind::Int, 0));
        assert!(codes.get(c).is_empty());
    }
}
