//! `CirEnv` / `CirLoopEnv`: the lexical scope stack and the enclosing
//! loop/switch target stack used while binding declarations (§3.9, §4.5
//! "Scoping").
//!
//! Each scope binds names to one of three declaration kinds (`Var`,
//! `Typedef`, `EnumItem`) and tags to one of two (`Comp`, `Enum`), the way
//! C keeps the ordinary and tag namespaces apart. The original linear-probed
//! a fixed-size table per scope; a `FxHashMap` gives the same "innermost
//! wins" lookup without a scope-size limit.

use crate::arena::Handle;
use crate::comp::Comp;
use crate::enum_::{Enum, EnumItem};
use crate::name::CirName;
use crate::stmt::Stmt;
use crate::typedef::Typedef;
use crate::var::Var;
use rustc_hash::FxHashMap;

#[derive(Clone, Copy)]
pub enum NameBinding {
    Var(Handle<Var>),
    Typedef(Handle<Typedef>),
    EnumItem(Handle<EnumItem>),
}

#[derive(Clone, Copy)]
pub enum TagBinding {
    Comp(Handle<Comp>),
    Enum(Handle<Enum>),
}

#[derive(Default)]
struct Scope {
    names: FxHashMap<CirName, NameBinding>,
    tags: FxHashMap<CirName, TagBinding>,
}

/// The scope stack. Scope 0 is always the global scope and is never popped.
pub struct Environment {
    scopes: Vec<Scope>,
}

impl Environment {
    pub fn new() -> Self {
        Environment { scopes: vec![Scope::default()] }
    }

    pub fn is_global(&self) -> bool {
        self.scopes.len() == 1
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() <= 1 {
            crate::cir_bug!("no more scopes to pop");
        }
        self.scopes.pop();
    }

    fn current(&self) -> &Scope {
        self.scopes.last().expect("scope stack is never empty")
    }
    fn current_mut(&mut self) -> &mut Scope {
        self.scopes.last_mut().expect("scope stack is never empty")
    }

    /// Search from the innermost scope outward.
    pub fn find_local_name(&self, name: CirName) -> Option<NameBinding> {
        self.scopes.iter().rev().find_map(|s| s.names.get(&name).copied())
    }

    pub fn find_global_name(&self, name: CirName) -> Option<NameBinding> {
        self.scopes[0].names.get(&name).copied()
    }

    pub fn find_current_scope_name(&self, name: CirName) -> Option<NameBinding> {
        self.current().names.get(&name).copied()
    }

    pub fn set_local_name(&mut self, name: CirName, binding: NameBinding) {
        self.current_mut().names.insert(name, binding);
    }

    pub fn find_local_tag(&self, name: CirName) -> Option<TagBinding> {
        self.scopes.iter().rev().find_map(|s| s.tags.get(&name).copied())
    }

    pub fn set_local_tag(&mut self, name: CirName, binding: TagBinding) {
        self.current_mut().tags.insert(name, binding);
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

struct LoopFrame {
    continue_stmt: Handle<Stmt>,
    /// `None` for a bare `switch` frame, which accepts `break` but not
    /// `continue`.
    break_stmt: Handle<Stmt>,
}

/// The stack of enclosing `for`/`while`/`do`/`switch` targets that `break`
/// and `continue` resolve against.
#[derive(Default)]
pub struct LoopEnv {
    frames: Vec<LoopFrame>,
}

impl LoopEnv {
    pub fn new() -> Self {
        LoopEnv::default()
    }

    pub fn push_loop(&mut self, continue_stmt: Handle<Stmt>, break_stmt: Handle<Stmt>) {
        self.frames.push(LoopFrame { continue_stmt, break_stmt });
    }

    /// A `switch` only ever satisfies `break`; a `continue` inside one must
    /// skip past it to the next enclosing loop, which the original encodes
    /// by storing `Handle::NONE` as its continue target.
    pub fn push_switch(&mut self, break_stmt: Handle<Stmt>) {
        self.frames.push(LoopFrame { continue_stmt: Handle::NONE, break_stmt });
    }

    pub fn pop(&mut self) {
        if self.frames.pop().is_none() {
            crate::cir_bug!("no enclosing loop/switch to pop");
        }
    }

    pub fn continue_target(&self) -> Option<Handle<Stmt>> {
        self.frames.iter().rev().map(|f| f.continue_stmt).find(|h| !h.is_none())
    }

    pub fn break_target(&self) -> Option<Handle<Stmt>> {
        self.frames.last().map(|f| f.break_stmt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scope_shadows_outer() {
        let mut env = Environment::new();
        let mut names = crate::name::NameTable::new();
        let x = names.intern("x");
        let outer: Handle<Var> = Handle::from_raw(1);
        let inner: Handle<Var> = Handle::from_raw(2);
        env.set_local_name(x, NameBinding::Var(outer));
        env.push_scope();
        env.set_local_name(x, NameBinding::Var(inner));
        match env.find_local_name(x) {
            Some(NameBinding::Var(h)) => assert_eq!(h, inner),
            _ => panic!("expected Var binding"),
        }
        env.pop_scope();
        match env.find_local_name(x) {
            Some(NameBinding::Var(h)) => assert_eq!(h, outer),
            _ => panic!("expected Var binding"),
        }
    }

    #[test]
    fn continue_skips_switch_frame() {
        let mut loops = LoopEnv::new();
        let loop_continue: Handle<Stmt> = Handle::from_raw(1);
        let loop_break: Handle<Stmt> = Handle::from_raw(2);
        let switch_break: Handle<Stmt> = Handle::from_raw(3);
        loops.push_loop(loop_continue, loop_break);
        loops.push_switch(switch_break);
        assert_eq!(loops.break_target(), Some(switch_break));
        assert_eq!(loops.continue_target(), Some(loop_continue));
    }
}
