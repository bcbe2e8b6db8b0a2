//! `Context`: the single owner of every arena, the name interner, the
//! machine parameters, and the lexical/loop scope stacks (§3, §4.4 "One
//! compilation context per program"). Everything in `circ-core` that
//! mutates IR state goes through a `&mut Context`.

use crate::arena::{Arena, Handle};
use crate::code::{Code, CodeArena};
use crate::comp::{Comp, IsoTable};
use crate::enum_::{Enum, EnumItem};
use crate::env::{Environment, LoopEnv};
use crate::error::LocationStack;
use crate::machine::Machine;
use crate::name::NameTable;
use crate::stmt::Stmt;
use crate::typedef::Typedef;
use crate::types::TypeEnv;
use crate::var::Var;

pub struct Context {
    pub names: NameTable,
    pub machine: Machine,
    pub locations: LocationStack,

    pub comps: Arena<Comp>,
    pub enums: Arena<Enum>,
    pub enum_items: Arena<EnumItem>,
    pub typedefs: Arena<Typedef>,
    pub vars: Arena<Var>,
    pub code: CodeArena,

    pub env: Environment,
    pub loops: LoopEnv,
    pub iso: IsoTable,

    /// Counters for `CirStmt_registerUser`/staging-library user-kind IDs
    /// (§4.7): one namespace for user statements, one for user values.
    next_user_stmt_kind: u32,
    next_user_value_kind: u32,
}

impl Context {
    pub fn new(machine: Machine) -> Self {
        Context {
            names: NameTable::new(),
            machine,
            locations: LocationStack::new(),
            comps: Arena::new(Comp::dummy()),
            enums: Arena::new(Enum::dummy()),
            enum_items: Arena::new(EnumItem::dummy()),
            typedefs: Arena::new(Typedef::dummy()),
            vars: Arena::new(Var::dummy()),
            code: CodeArena::new(),
            env: Environment::new(),
            loops: LoopEnv::new(),
            iso: IsoTable::new(),
            next_user_stmt_kind: 0,
            next_user_value_kind: 0,
        }
    }

    pub fn stmts(&self) -> &crate::stmt::StmtArena {
        &self.code.stmts
    }
    pub fn stmts_mut(&mut self) -> &mut crate::stmt::StmtArena {
        &mut self.code.stmts
    }
    pub fn stmt(&self, h: Handle<Stmt>) -> &Stmt {
        self.code.stmts.get(h)
    }

    pub fn new_var(&mut self, owner: Handle<Code>) -> Handle<Var> {
        self.vars.push(Var::new(owner))
    }

    /// `CirStmt_registerUser`: a fresh, distinct kind ID for a staging
    /// library's custom statement payload.
    pub fn register_user_stmt_kind(&mut self) -> u32 {
        self.next_user_stmt_kind += 1;
        self.next_user_stmt_kind
    }

    /// `CirValue_registerUser`, mirroring the statement case but in its own
    /// namespace — a user statement kind and a user value kind with the same
    /// number are unrelated.
    pub fn register_user_value_kind(&mut self) -> u32 {
        self.next_user_value_kind += 1;
        self.next_user_value_kind
    }

    pub fn sizeof(&self, ty: &crate::types::Type) -> u64 {
        crate::types::sizeof_with(ty, self, &self.machine)
    }
    pub fn alignof(&self, ty: &crate::types::Type) -> u64 {
        crate::types::alignof_with(ty, self, &self.machine)
    }
    pub fn unroll(&self, ty: &crate::types::Type) -> crate::types::Type {
        crate::types::unroll(ty, self)
    }
    pub fn unroll_deep(&self, ty: &crate::types::Type) -> crate::types::Type {
        crate::types::unroll_deep(ty, self)
    }
}

impl TypeEnv for Context {
    fn typedef(&self, id: Handle<Typedef>) -> &Typedef {
        self.typedefs.get(id)
    }
    fn comp(&self, id: Handle<Comp>) -> &Comp {
        self.comps.get(id)
    }
    fn enum_(&self, id: Handle<Enum>) -> &Enum {
        self.enums.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_kind_counters_are_independent() {
        let mut ctx = Context::new(Machine::build());
        assert_eq!(ctx.register_user_stmt_kind(), 1);
        assert_eq!(ctx.register_user_value_kind(), 1);
        assert_eq!(ctx.register_user_stmt_kind(), 2);
    }

    #[test]
    fn sizeof_int_matches_machine() {
        let ctx = Context::new(Machine::build());
        let ty = crate::types::Type::int(crate::machine::IKind::Int);
        assert_eq!(ctx.sizeof(&ty), 4);
    }
}
