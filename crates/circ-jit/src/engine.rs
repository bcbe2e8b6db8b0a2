//! The JIT engine: resolves `CirVar`s to stack slots, global-arena offsets,
//! or external addresses, compiles queued function bodies to machine code,
//! and backpatches every cross-function reference once its target is known
//! (§4.6 "Compiling a function", §4.7 "Invoking compiled code").

use crate::asm::{Cond, CodeBuffer, Reg, X86_64Assembler, JCC_REL32_LEN, JMP_REL32_LEN};
use crate::memory::{ExecutablePage, GlobalArena};
use circ_core::arena::Handle;
use circ_core::cir_bug;
use circ_core::code::Code;
use circ_core::context::Context;
use circ_core::op::{BinOp, CondOp, UnOp};
use circ_core::stmt::{Stmt, StmtKind};
use circ_core::types::Type;
use circ_core::value::{Value, ValueKind};
use circ_core::var::Var;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

/// Fixed-size pool backing every global (`static`/file-scope) variable, the
/// way the reference backend reserves one flat zeroed region up front
/// rather than growing it (§4.6 "Global data").
const GLOBAL_MEM_SIZE: usize = 1 << 20;

/// The call-stub trampoline, copied byte for byte from the reference
/// backend: it unpacks a generic `void *argMem[]` vector (self-pointer
/// plus up to six further slots) into the System V integer argument
/// registers and tail-jumps to the target, so a JIT'd function can be
/// invoked without synthesizing a bespoke calling sequence per arity.
const CALL_STUB_CODE: &[u8] = &[
    0x49, 0x89, 0xfa, // mov r10, rdi
    0x49, 0x8b, 0x7a, 0x08, // mov rdi, [r10+0x8]
    0x49, 0x8b, 0x72, 0x10, // mov rsi, [r10+0x10]
    0x49, 0x8b, 0x52, 0x18, // mov rdx, [r10+0x18]
    0x49, 0x8b, 0x4a, 0x20, // mov rcx, [r10+0x20]
    0x4d, 0x8b, 0x42, 0x28, // mov r8,  [r10+0x28]
    0x4d, 0x8b, 0x4a, 0x30, // mov r9,  [r10+0x30]
    0x4d, 0x8b, 0x12, // mov r10, [r10]
    0x41, 0xff, 0xe2, // jmp r10
];

/// `REG_GLOBAL_BASE`/`REG_MEM_ADDR`/`REG_OPERAND1`/`REG_OPERAND2` from the
/// reference backend's register convention.
const REG_GLOBAL_BASE: Reg = Reg::R10;
const REG_MEM_ADDR: Reg = Reg::R11;
const REG_OPERAND1: Reg = Reg::Rcx;
const REG_OPERAND2: Reg = Reg::Rdx;

/// Look up `name` in the symbol table of every shared object already loaded
/// into this process (`libc`, and anything else linked in), the way an
/// `extern` declaration with no definition in the translation unit expects
/// to be resolved. Returns 0 if no loaded object exports the name.
fn resolve_host_symbol(name: &str) -> u64 {
    let Ok(cname) = std::ffi::CString::new(name) else {
        return 0;
    };
    unsafe { libc::dlsym(libc::RTLD_DEFAULT, cname.as_ptr()) as u64 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AllocStatus {
    Stack(i32),
    Global(i32),
    /// A fully resolved code or data address (a finished function, or an
    /// externally linked symbol).
    External(u64),
    /// Queued for compilation but not yet placed; any reference to it must
    /// go through a `movabs` backpatched once compilation lands it.
    Compiling,
}

#[derive(Default)]
struct VarInfo {
    status: Option<AllocStatus>,
}

/// A pending `movabs reg, imm64` whose immediate is a variable's
/// not-yet-known absolute address.
struct PendingVarPatch {
    page_offset: usize,
    var: Handle<Var>,
}

enum JumpKind {
    Jmp,
    Jcc,
}

/// A pending relative jump whose target statement hasn't been emitted yet.
struct PendingStmtPatch {
    /// Offset of the instruction's *first* byte, not the displacement —
    /// the displacement offset is derived from `kind` at patch time.
    instr_offset: usize,
    kind: JumpKind,
    target: Handle<Stmt>,
}

pub struct Engine {
    page: ExecutablePage,
    /// Real backing storage for every global variable. Its base address is
    /// loaded into `REG_GLOBAL_BASE` in every function's prologue, so a
    /// `Global(offset)` access is just `[r10+offset]`.
    global_mem: GlobalArena,
    varinfos: FxHashMap<Handle<Var>, VarInfo>,
    compile_queue: VecDeque<Handle<Var>>,
    global_bump: usize,
    var_patches: Vec<PendingVarPatch>,
    stmt_patches: Vec<PendingStmtPatch>,
    stmt_locs: FxHashMap<Handle<Stmt>, usize>,
    call_stub_offset: Option<usize>,
    finished: bool,
}

impl Engine {
    pub fn new(code_size_hint: usize) -> Result<Self, crate::memory::MemoryError> {
        Ok(Engine {
            page: ExecutablePage::new(code_size_hint.max(4096))?,
            global_mem: GlobalArena::new(GLOBAL_MEM_SIZE)?,
            varinfos: FxHashMap::default(),
            compile_queue: VecDeque::new(),
            global_bump: 0,
            var_patches: Vec::new(),
            stmt_patches: Vec::new(),
            stmt_locs: FxHashMap::default(),
            call_stub_offset: None,
            finished: false,
        })
    }

    fn varinfo_mut(&mut self, var: Handle<Var>) -> &mut VarInfo {
        self.varinfos.entry(var).or_default()
    }

    fn status_of(&self, var: Handle<Var>) -> Option<AllocStatus> {
        self.varinfos.get(&var).and_then(|v| v.status)
    }

    /// Carve `size` bytes (aligned to `align`) out of the real global arena,
    /// returning the offset from its base. Panics if the fixed arena is
    /// exhausted, matching the reference backend's fixed global pool.
    fn global_alloc(&mut self, size: u64, align: u64) -> i32 {
        let align = align.max(1) as usize;
        self.global_bump = (self.global_bump + align - 1) / align * align;
        let offset = self.global_bump;
        self.global_bump += size as usize;
        assert!(self.global_bump <= self.global_mem.len(), "out of global JIT memory");
        offset as i32
    }

    /// Resolve a global or function-valued variable (allocating global
    /// storage, or queueing the function for compilation, on first sight).
    /// Functions with a body are marked `Compiling` so recursive/mutual
    /// references see a consistent placeholder to patch. Must not be called
    /// for a genuine function-local — those go through
    /// [`Engine::resolve_in_function`], which needs the local's own frame.
    fn resolve_var(&mut self, ctx: &Context, var: Handle<Var>) -> AllocStatus {
        if let Some(status) = self.status_of(var) {
            return status;
        }
        let v = ctx.vars.get(var);
        let is_function = v.ty.as_ref().is_some_and(Type::is_fun);
        let status = if is_function {
            if !v.body.is_none() {
                self.compile_queue.push_back(var);
                AllocStatus::Compiling
            } else {
                // Declared but never defined in this translation unit:
                // resolved against the running process's own symbol table
                // (§6 "host symbol resolution"), the same table `dlopen`
                // would search with a null handle.
                let name = ctx.names.resolve(v.name);
                AllocStatus::External(resolve_host_symbol(name))
            }
        } else if v.is_global() {
            let ty = v.ty.clone().unwrap_or_else(Type::void);
            let size = ctx.sizeof(&ty).max(1);
            let align = ctx.alignof(&ty).max(1);
            AllocStatus::Global(self.global_alloc(size, align))
        } else {
            cir_bug!("resolve_var called on a function-local variable")
        };
        self.varinfo_mut(var).status = Some(status);
        status
    }

    /// Resolve a variable referenced from inside a function body: locals
    /// (including builder-synthesized temporaries, which the builder never
    /// registers in `Code::vars`) get a stack slot assigned the first time
    /// they're seen; globals and functions fall back to [`Engine::resolve_var`].
    fn resolve_in_function(
        &mut self,
        ctx: &Context,
        var: Handle<Var>,
        locals: &mut FxHashMap<Handle<Var>, i32>,
        frame_size: &mut i32,
    ) -> AllocStatus {
        if let Some(&offset) = locals.get(&var) {
            return AllocStatus::Stack(offset);
        }
        if ctx.vars.get(var).is_global() {
            return self.resolve_var(ctx, var);
        }
        self.assign_stack_slot(ctx, var, locals, frame_size);
        AllocStatus::Stack(locals[&var])
    }

    /// Compile every function reachable from `entry`, draining the compile
    /// queue until empty, then patch every cross-function reference and
    /// flip the page executable.
    pub fn compile_reachable(&mut self, ctx: &mut Context, entry: Handle<Var>) -> usize {
        self.resolve_var(ctx, entry);
        while let Some(var) = self.compile_queue.pop_front() {
            self.compile_function(ctx, var);
        }
        self.finish();
        match self.status_of(entry) {
            Some(AllocStatus::External(addr)) if addr != 0 => addr as usize,
            Some(AllocStatus::External(_)) => cir_bug!("entry point was never defined"),
            _ => cir_bug!("entry point is not a function"),
        }
    }

    fn compile_function(&mut self, ctx: &mut Context, func_var: Handle<Var>) {
        let body = ctx.vars.get(func_var).body;
        let formals = ctx.vars.get(func_var).formals.clone();

        let mut locals: FxHashMap<Handle<Var>, i32> = FxHashMap::default();
        let mut frame_size: i32 = 0;
        for &p in &formals {
            self.assign_stack_slot(ctx, p, &mut locals, &mut frame_size);
        }

        let entry_offset = self.page.cursor();
        self.varinfo_mut(func_var).status = Some(AllocStatus::Compiling);

        self.emit(|asm| {
            asm.push(Reg::Rbp);
            asm.mov_rr(Reg::Rbp, Reg::Rsp);
        });

        // Every global access inside the body compiles down to
        // `[REG_GLOBAL_BASE+offset]`; load the arena's base once per call so
        // the rest of the function never has to re-materialize it.
        let global_base = self.global_mem.base_ptr() as i64;
        self.emit(move |asm| asm.mov_ri64(REG_GLOBAL_BASE, global_base));

        // System V passes the first six integer args in Rdi/Rsi/Rdx/Rcx/R8/R9;
        // spill them straight to their stack slots so the rest of the body
        // can treat every local uniformly.
        const ARG_REGS: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];
        let arg_slots: Vec<i32> = formals.iter().map(|p| locals[p]).collect();
        for (&reg, &slot) in ARG_REGS.iter().zip(arg_slots.iter()) {
            self.emit(move |asm| asm.mov_mr(Reg::Rbp, slot, reg));
        }

        // Reserve the frame only after the body has claimed every local;
        // the placeholder `sub` immediate is patched in below.
        let frame_patch_at = self.page.cursor();
        self.emit(|asm| {
            asm.sub_ri32(Reg::Rsp, 0);
        });

        if !body.is_none() {
            self.compile_code_block(ctx, body, &mut locals, &mut frame_size);
        }

        self.emit(|asm| {
            asm.mov_rr(Reg::Rsp, Reg::Rbp);
            asm.pop(Reg::Rbp);
            asm.ret();
        });

        if frame_size > 0 {
            let aligned = (frame_size + 15) / 16 * 16;
            // `sub rsp, imm32` is REX(1) + opcode(1) + modrm(1) + imm32(4);
            // the immediate starts 3 bytes into the instruction.
            self.page.patch(frame_patch_at + 3, &aligned.to_le_bytes());
        }

        self.varinfo_mut(func_var).status = Some(AllocStatus::External(entry_offset as u64));
    }

    fn assign_stack_slot(
        &mut self,
        ctx: &Context,
        var: Handle<Var>,
        locals: &mut FxHashMap<Handle<Var>, i32>,
        frame_size: &mut i32,
    ) {
        if locals.contains_key(&var) {
            return;
        }
        let ty = ctx.vars.get(var).ty.clone().unwrap_or_else(Type::void);
        let size = ctx.sizeof(&ty).max(1) as i32;
        let align = ctx.alignof(&ty).max(1) as i32;
        *frame_size = (*frame_size + align - 1) / align * align;
        *frame_size += size;
        let offset = -*frame_size;
        locals.insert(var, offset);
        self.varinfo_mut(var).status = Some(AllocStatus::Stack(offset));
    }

    fn compile_code_block(
        &mut self,
        ctx: &mut Context,
        code: Handle<Code>,
        locals: &mut FxHashMap<Handle<Var>, i32>,
        frame_size: &mut i32,
    ) {
        let vars = ctx.code.get(code).vars.clone();
        for v in vars {
            self.assign_stack_slot(ctx, v, locals, frame_size);
        }

        let mut cur = ctx.code.get(code).first;
        while !cur.is_none() {
            self.stmt_locs.insert(cur, self.page.cursor());
            let kind = ctx.stmt(cur).kind.clone();
            self.compile_stmt(ctx, &kind, locals, frame_size);
            cur = ctx.stmt(cur).next;
        }
    }

    fn compile_stmt(
        &mut self,
        ctx: &mut Context,
        kind: &StmtKind,
        locals: &mut FxHashMap<Handle<Var>, i32>,
        frame_size: &mut i32,
    ) {
        match kind {
            StmtKind::Nop | StmtKind::Label { .. } => {}
            StmtKind::UnOp { dst, op, operand } => {
                self.load_value(ctx, operand, REG_OPERAND1, locals, frame_size);
                match op {
                    UnOp::Neg => self.emit(|asm| asm.neg_r(REG_OPERAND1)),
                    UnOp::BNot => self.emit(|asm| asm.not_r(REG_OPERAND1)),
                    UnOp::LNot => self.emit(|asm| {
                        asm.test_rr(REG_OPERAND1, REG_OPERAND1);
                        asm.setcc(Cond::E, REG_OPERAND1);
                        asm.movzx_r64_r8(REG_OPERAND1, REG_OPERAND1);
                    }),
                    UnOp::AddrOf | UnOp::Identity => {}
                }
                self.store_value(ctx, dst, REG_OPERAND1, locals, frame_size);
            }
            StmtKind::BinOp { dst, op, lhs, rhs } => {
                self.load_value(ctx, lhs, REG_OPERAND1, locals, frame_size);
                self.load_value(ctx, rhs, REG_OPERAND2, locals, frame_size);
                match op {
                    BinOp::Plus => self.emit(|asm| asm.add_rr(REG_OPERAND1, REG_OPERAND2)),
                    BinOp::Minus => self.emit(|asm| asm.sub_rr(REG_OPERAND1, REG_OPERAND2)),
                    BinOp::Mul => self.emit(|asm| asm.imul_rr(REG_OPERAND1, REG_OPERAND2)),
                    BinOp::Div => self.emit(|asm| {
                        asm.mov_rr(Reg::Rax, REG_OPERAND1);
                        asm.cqo();
                        asm.idiv_r(REG_OPERAND2);
                        asm.mov_rr(REG_OPERAND1, Reg::Rax);
                    }),
                    BinOp::Mod => self.emit(|asm| {
                        asm.mov_rr(Reg::Rax, REG_OPERAND1);
                        asm.cqo();
                        asm.idiv_r(REG_OPERAND2);
                        asm.mov_rr(REG_OPERAND1, Reg::Rdx);
                    }),
                    BinOp::ShiftLt => self.emit(|asm| {
                        asm.mov_rr(Reg::Rcx, REG_OPERAND2);
                        asm.shl_r_cl(REG_OPERAND1);
                    }),
                    BinOp::ShiftRt => self.emit(|asm| {
                        asm.mov_rr(Reg::Rcx, REG_OPERAND2);
                        asm.sar_r_cl(REG_OPERAND1);
                    }),
                    BinOp::BAnd => self.emit(|asm| asm.and_rr(REG_OPERAND1, REG_OPERAND2)),
                    BinOp::BXor => self.emit(|asm| asm.xor_rr(REG_OPERAND1, REG_OPERAND2)),
                    BinOp::BOr => self.emit(|asm| asm.or_rr(REG_OPERAND1, REG_OPERAND2)),
                }
                self.store_value(ctx, dst, REG_OPERAND1, locals, frame_size);
            }
            StmtKind::Cmp { op, lhs, rhs, target } => {
                self.load_value(ctx, lhs, REG_OPERAND1, locals, frame_size);
                self.load_value(ctx, rhs, REG_OPERAND2, locals, frame_size);
                self.emit(|asm| asm.cmp_rr(REG_OPERAND1, REG_OPERAND2));
                let cond = condop_to_cond(*op);
                let instr_offset = self.page.cursor();
                self.emit(move |asm| {
                    asm.jcc_rel32(cond, 0);
                });
                self.stmt_patches.push(PendingStmtPatch { instr_offset, kind: JumpKind::Jcc, target: *target });
            }
            StmtKind::Goto { target } => {
                let instr_offset = self.page.cursor();
                self.emit(|asm| {
                    asm.jmp_rel32(0);
                });
                self.stmt_patches.push(PendingStmtPatch { instr_offset, kind: JumpKind::Jmp, target: *target });
            }
            StmtKind::GotoLabel { .. } => {
                cir_bug!("unresolved goto-by-label reached the JIT; label resolution must run first")
            }
            StmtKind::Return { value } => {
                if let Some(v) = value {
                    self.load_value(ctx, v, Reg::Rax, locals, frame_size);
                }
                self.emit(|asm| {
                    asm.mov_rr(Reg::Rsp, Reg::Rbp);
                    asm.pop(Reg::Rbp);
                    asm.ret();
                });
            }
            StmtKind::Call { dst, target, args } => {
                self.compile_call(ctx, dst, target, args, locals, frame_size);
            }
            StmtKind::User { .. } => {
                cir_bug!("a staging-library user statement reached the JIT without being lowered first")
            }
        }
    }

    fn compile_call(
        &mut self,
        ctx: &mut Context,
        dst: &Value,
        target: &Value,
        args: &[Value],
        locals: &mut FxHashMap<Handle<Var>, i32>,
        frame_size: &mut i32,
    ) {
        const ARG_REGS: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];
        assert!(args.len() <= ARG_REGS.len(), "more than six arguments not yet supported by the JIT");
        for (arg, &reg) in args.iter().zip(ARG_REGS.iter()) {
            self.load_value(ctx, arg, reg, locals, frame_size);
        }
        match target.kind() {
            ValueKind::Var(var, fields) if fields.is_empty() => {
                let status = self.resolve_var(ctx, *var);
                match status {
                    AllocStatus::External(addr) if addr != 0 => {
                        self.emit(move |asm| {
                            asm.mov_ri64(Reg::Rax, addr as i64);
                        });
                    }
                    AllocStatus::Compiling => {
                        let var = *var;
                        let imm_offset = self.emit_ret(move |asm| asm.mov_ri64(Reg::Rax, 0));
                        self.var_patches.push(PendingVarPatch { page_offset: imm_offset, var });
                    }
                    AllocStatus::External(_) => cir_bug!("call to an extern function the host symbol table has no definition for"),
                    AllocStatus::Stack(_) | AllocStatus::Global(_) => {
                        cir_bug!("call target resolved to data storage, not code")
                    }
                }
                self.emit(|asm| asm.call_r(Reg::Rax));
            }
            _ => {
                self.load_value(ctx, target, Reg::Rax, locals, frame_size);
                self.emit(|asm| asm.call_r(Reg::Rax));
            }
        }
        self.store_value(ctx, dst, Reg::Rax, locals, frame_size);
    }

    fn load_value(
        &mut self,
        ctx: &Context,
        v: &Value,
        dst: Reg,
        locals: &mut FxHashMap<Handle<Var>, i32>,
        frame_size: &mut i32,
    ) {
        match v.kind() {
            ValueKind::Int(_, n) => {
                let n = *n;
                self.emit(move |asm| {
                    asm.mov_ri64(dst, n);
                });
            }
            ValueKind::Var(var, fields) if fields.is_empty() => {
                self.load_var(ctx, *var, dst, locals, frame_size, false);
            }
            ValueKind::Mem(var, fields) if fields.is_empty() => {
                self.load_var(ctx, *var, dst, locals, frame_size, true);
            }
            ValueKind::Var(..) | ValueKind::Mem(..) => {
                cir_bug!("field-offset addressing not yet lowered before reaching the JIT")
            }
            ValueKind::Str(_) | ValueKind::Type(_) | ValueKind::Builtin(_) | ValueKind::User(..) => {
                cir_bug!("non-scalar value kind reached a register load")
            }
        }
    }

    fn load_var(
        &mut self,
        ctx: &Context,
        var: Handle<Var>,
        dst: Reg,
        locals: &mut FxHashMap<Handle<Var>, i32>,
        frame_size: &mut i32,
        deref: bool,
    ) {
        match self.resolve_in_function(ctx, var, locals, frame_size) {
            AllocStatus::Global(offset) => {
                self.emit(move |asm| asm.mov_rm(dst, REG_GLOBAL_BASE, offset));
            }
            AllocStatus::External(addr) => {
                self.emit(move |asm| {
                    asm.mov_ri64(dst, addr as i64);
                    asm.mov_rm(dst, dst, 0);
                });
            }
            AllocStatus::Compiling => {
                let imm_offset = self.emit_ret(move |asm| asm.mov_ri64(dst, 0));
                self.var_patches.push(PendingVarPatch { page_offset: imm_offset, var });
            }
            AllocStatus::Stack(offset) => {
                self.emit(move |asm| asm.mov_rm(dst, Reg::Rbp, offset));
            }
        }
        if deref {
            self.emit(move |asm| asm.mov_rm(dst, dst, 0));
        }
    }

    fn store_value(
        &mut self,
        ctx: &Context,
        v: &Value,
        src: Reg,
        locals: &mut FxHashMap<Handle<Var>, i32>,
        frame_size: &mut i32,
    ) {
        let (var, fields, deref) = match v.kind() {
            ValueKind::Var(var, fields) => (*var, fields.clone(), false),
            ValueKind::Mem(var, fields) => (*var, fields.clone(), true),
            _ => cir_bug!("store target is not an lvalue"),
        };
        assert!(fields.is_empty(), "field-offset addressing not yet lowered before reaching the JIT");

        if deref {
            self.load_var(ctx, var, REG_MEM_ADDR, locals, frame_size, false);
            self.emit(move |asm| asm.mov_mr(REG_MEM_ADDR, 0, src));
            return;
        }
        match self.resolve_in_function(ctx, var, locals, frame_size) {
            AllocStatus::Global(offset) => self.emit(move |asm| asm.mov_mr(REG_GLOBAL_BASE, offset, src)),
            AllocStatus::Stack(offset) => self.emit(move |asm| asm.mov_mr(Reg::Rbp, offset, src)),
            AllocStatus::External(_) | AllocStatus::Compiling => {
                cir_bug!("store to a function-valued target")
            }
        }
    }

    /// Assemble one instruction sequence into a scratch buffer, then append
    /// its bytes to the code page.
    fn emit(&mut self, f: impl FnOnce(&mut X86_64Assembler)) {
        self.emit_ret(f);
    }

    /// Like [`Engine::emit`], but returns the page offset the callback's
    /// buffer started at, for callers that need to backpatch bytes the
    /// callback wrote (the immediate of a `movabs`, say).
    fn emit_ret(&mut self, f: impl FnOnce(&mut X86_64Assembler)) -> usize {
        let mut buf = CodeBuffer::new();
        {
            let mut asm = X86_64Assembler::new(&mut buf);
            f(&mut asm);
        }
        let bytes = buf.into_bytes();
        self.page.write(&bytes)
    }

    /// Backpatch every pending `movabs` and relative jump, then flip the
    /// page executable (§4.6 "Finishing compilation").
    fn finish(&mut self) {
        if self.finished {
            return;
        }
        for patch in std::mem::take(&mut self.var_patches) {
            let addr = match self.status_of(patch.var) {
                Some(AllocStatus::External(a)) => a,
                other => cir_bug!("variable patch target never resolved to code: {:?}", other),
            };
            self.page.patch(patch.page_offset, &addr.to_le_bytes());
        }
        for patch in std::mem::take(&mut self.stmt_patches) {
            let target = *self.stmt_locs.get(&patch.target).expect("jump target statement was never compiled");
            let (instr_len, disp_offset) = match patch.kind {
                JumpKind::Jmp => (JMP_REL32_LEN, patch.instr_offset + 1),
                JumpKind::Jcc => (JCC_REL32_LEN, patch.instr_offset + 2),
            };
            let rel = (target as i64) - (patch.instr_offset as i64 + instr_len as i64);
            self.page.patch(disp_offset, &(rel as i32).to_le_bytes());
        }
        self.page.finish().expect("mprotect to RX failed");
        self.finished = true;
    }

    /// Invoke a compiled function through the call stub (§4.7 "Invoking
    /// compiled code"): `args` is the generic argument vector the stub
    /// unpacks into the System V integer registers, with `args[0]` always
    /// the target function pointer itself.
    pub fn call_via_stub(&mut self, target_offset: usize, args: &[u64; 6]) -> u64 {
        assert!(self.finished, "call_via_stub before finish()");
        let stub_offset = self.call_stub_offset.expect("call stub must be installed before finish()");
        let target = unsafe { self.page.fn_ptr_at(target_offset) };
        let mut mem = [0u64; 7];
        mem[0] = target as u64;
        mem[1..].copy_from_slice(args);
        let stub: extern "C" fn(*mut u64) -> u64 = unsafe { std::mem::transmute(self.page.fn_ptr_at(stub_offset)) };
        stub(mem.as_mut_ptr())
    }

    /// Install the call stub into the code page. Must run before
    /// `compile_reachable`/`finish`, since both require the page still be
    /// writable.
    pub fn install_call_stub(&mut self) {
        if self.call_stub_offset.is_some() {
            return;
        }
        let at = self.page.write(CALL_STUB_CODE);
        self.call_stub_offset = Some(at);
    }
}

fn condop_to_cond(op: CondOp) -> Cond {
    match op {
        CondOp::Lt => Cond::L,
        CondOp::Gt => Cond::G,
        CondOp::Le => Cond::Le,
        CondOp::Ge => Cond::Ge,
        CondOp::Eq => Cond::E,
        CondOp::Ne => Cond::Ne,
    }
}
