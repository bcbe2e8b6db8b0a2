//! `CirStmt`: a single three-address statement (§3.7), linked into its
//! owning `Code` by an intrusive doubly-linked list.

use crate::arena::Handle;
use crate::code::Code;
use crate::name::CirName;
use crate::op::{BinOp, CondOp, UnOp};
use crate::value::Value;
use std::sync::Arc;

#[derive(Clone)]
pub enum StmtKind {
    Nop,
    UnOp { dst: Value, op: UnOp, operand: Value },
    BinOp { dst: Value, op: BinOp, lhs: Value, rhs: Value },
    Call { dst: Value, target: Value, args: Arc<[Value]> },
    Return { value: Option<Value> },
    /// Conditional branch: jump to `target` iff `op(lhs, rhs)` holds.
    Cmp { op: CondOp, lhs: Value, rhs: Value, target: Handle<Stmt> },
    Goto { target: Handle<Stmt> },
    Label { name: CirName },
    /// An unresolved `goto` by name, rewritten to `Goto` once every label in
    /// the enclosing function is known (§4.5 "Label resolution").
    GotoLabel { name: CirName },
    User { uid: u32, payload: Arc<dyn std::any::Any> },
}

/// A node of the per-`Code` doubly-linked statement list. `prev`/`next` are
/// `Handle::NONE` at the ends; `owner` is `Handle::NONE` for an orphan.
pub struct Stmt {
    pub kind: StmtKind,
    pub owner: Handle<Code>,
    pub prev: Handle<Stmt>,
    pub next: Handle<Stmt>,
}

impl Stmt {
    pub fn dummy() -> Self {
        Stmt { kind: StmtKind::Nop, owner: Handle::NONE, prev: Handle::NONE, next: Handle::NONE }
    }

    fn orphan() -> Self {
        Stmt { kind: StmtKind::Nop, owner: Handle::NONE, prev: Handle::NONE, next: Handle::NONE }
    }

    pub fn is_orphan(&self) -> bool {
        self.owner.is_none()
    }

    pub fn is_nop(&self) -> bool {
        matches!(self.kind, StmtKind::Nop)
    }

    pub fn is_jump(&self) -> bool {
        matches!(self.kind, StmtKind::Cmp { .. } | StmtKind::Goto { .. } | StmtKind::GotoLabel { .. })
    }

    pub fn is_user(&self) -> Option<u32> {
        match self.kind {
            StmtKind::User { uid, .. } => Some(uid),
            _ => None,
        }
    }

    pub fn jump_target(&self) -> Option<Handle<Stmt>> {
        match &self.kind {
            StmtKind::Cmp { target, .. } | StmtKind::Goto { target } => Some(*target),
            _ => None,
        }
    }

    pub fn set_jump_target(&mut self, target: Handle<Stmt>) {
        match &mut self.kind {
            StmtKind::Cmp { target: t, .. } | StmtKind::Goto { target: t } => *t = target,
            _ => crate::cir_bug!("Stmt::set_jump_target on a non-jump statement"),
        }
    }
}

/// Arena of statements, keyed by `Handle<Stmt>`, with helpers mirroring the
/// original's free-standing `newOrphan`/`newAfter`/`newBefore`/`orphanize`
/// entry points. Mutation beyond simple linkage goes through `Context`,
/// which owns both this arena and the `Code` arena it threads statements
/// through.
pub struct StmtArena {
    pub(crate) arena: crate::arena::Arena<Stmt>,
}

impl StmtArena {
    pub fn new() -> Self {
        StmtArena { arena: crate::arena::Arena::new(Stmt::dummy()) }
    }

    pub fn get(&self, h: Handle<Stmt>) -> &Stmt {
        self.arena.get(h)
    }
    pub fn get_mut(&mut self, h: Handle<Stmt>) -> &mut Stmt {
        self.arena.get_mut(h)
    }

    /// `CirStmt_newOrphan`: a fresh NOP detached from any code.
    pub fn new_orphan(&mut self) -> Handle<Stmt> {
        self.arena.push(Stmt::orphan())
    }

    /// Splice a fresh orphan NOP immediately after `sid` in its list.
    pub fn new_after(&mut self, sid: Handle<Stmt>) -> Handle<Stmt> {
        let owner = self.get(sid).owner;
        let next = self.get(sid).next;
        let new = self.arena.push(Stmt { kind: StmtKind::Nop, owner, prev: sid, next });
        self.get_mut(sid).next = new;
        if !next.is_none() {
            self.get_mut(next).prev = new;
        }
        new
    }

    /// Splice a fresh orphan NOP immediately before `sid` in its list.
    pub fn new_before(&mut self, sid: Handle<Stmt>) -> Handle<Stmt> {
        let owner = self.get(sid).owner;
        let prev = self.get(sid).prev;
        let new = self.arena.push(Stmt { kind: StmtKind::Nop, owner, prev, next: sid });
        self.get_mut(sid).prev = new;
        if !prev.is_none() {
            self.get_mut(prev).next = new;
        }
        new
    }

    /// Unlink `sid` from its owning list, leaving it an orphan NOP.
    /// The caller is responsible for patching the owning `Code`'s
    /// first/last pointers if `sid` was an endpoint.
    pub fn orphanize(&mut self, sid: Handle<Stmt>) {
        let (prev, next) = {
            let s = self.get(sid);
            (s.prev, s.next)
        };
        if !prev.is_none() {
            self.get_mut(prev).next = next;
        }
        if !next.is_none() {
            self.get_mut(next).prev = prev;
        }
        let s = self.get_mut(sid);
        s.owner = Handle::NONE;
        s.prev = Handle::NONE;
        s.next = Handle::NONE;
        s.kind = StmtKind::Nop;
    }
}

impl Default for StmtArena {
    fn default() -> Self {
        StmtArena::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_after_splices_into_list() {
        let mut stmts = StmtArena::new();
        let a = stmts.new_orphan();
        let b = stmts.new_after(a);
        assert_eq!(stmts.get(a).next, b);
        assert_eq!(stmts.get(b).prev, a);
    }

    #[test]
    fn orphanize_reknits_neighbors() {
        let mut stmts = StmtArena::new();
        let a = stmts.new_orphan();
        let b = stmts.new_after(a);
        let c = stmts.new_after(b);
        stmts.orphanize(b);
        assert_eq!(stmts.get(a).next, c);
        assert_eq!(stmts.get(c).prev, a);
        assert!(stmts.get(b).is_orphan());
    }
}
