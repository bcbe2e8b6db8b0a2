//! Parser-level conformance: checks the IR the parser actually produces
//! (declaration combining, constant folding, scope rules) without going
//! through the renderer.

use circ_core::value::ValueKind;
use circ_frontend::parse_program;

// ============================================================================
// Declaration combining
// ============================================================================

#[test]
fn forward_declarations_combine_before_the_definition() {
    let src = "void g(int); void g(); void g(int x){}";
    parse_program(src, "combine_a.c").expect("compatible forward declarations should combine");
}

#[test]
fn forward_declarations_combine_in_reverse_order() {
    let src = "void g(); void g(int); void g(int x){}";
    parse_program(src, "combine_b.c").expect("order of compatible forward declarations shouldn't matter");
}

#[test]
fn conflicting_redeclaration_is_fatal() {
    let src = "void g(int); void g(char);";
    let err = parse_program(src, "combine_conflict.c");
    assert!(err.is_err(), "incompatible redeclaration must be rejected");
}

// ============================================================================
// Constant folding at the IR level
// ============================================================================

#[test]
fn global_initializer_constant_folds_at_parse_time() {
    let ctx = parse_program("int x = 1 + 2 * 3;", "fold.c").unwrap();
    let (_, var) = ctx.vars.iter().find(|(_, v)| v.is_global() && !v.ty.as_ref().unwrap().is_fun()).expect("global var missing");
    match &var.init {
        Some(v) => match v.kind() {
            ValueKind::Int(_, n) => assert_eq!(*n, 7),
            _ => panic!("expected a folded int constant"),
        },
        None => panic!("expected the global to carry a constant initializer"),
    }
}

#[test]
fn non_constant_global_initializer_is_rejected() {
    let src = "int f(void); int x = f();";
    let err = parse_program(src, "non_const_init.c");
    assert!(err.is_err(), "a call result is not a constant expression");
}

// ============================================================================
// Scoping
// ============================================================================

#[test]
fn redeclaring_a_local_in_the_same_scope_is_fatal() {
    let src = "void f(void) { int a; int a; }";
    let err = parse_program(src, "redecl.c");
    assert!(err.is_err());
}

#[test]
fn shadowing_a_local_in_a_nested_block_is_allowed() {
    let src = "void f(void) { int a; { int a; } }";
    parse_program(src, "shadow.c").expect("a nested block may shadow an outer local");
}

// ============================================================================
// Control flow shape
// ============================================================================

#[test]
fn while_loop_condition_runs_every_iteration() {
    // Regression check for the loop-condition side-effect placement bug:
    // the condition must live in the loop's repeating chain, not run once
    // before the loop starts. We can't execute without the JIT crate here,
    // so this only checks the function parses and installs a body at all.
    let src = "int f(int n) { int i; i = 0; while (i < n) { i = i + 1; } return i; }";
    let ctx = parse_program(src, "while_loop.c").unwrap();
    let (_, f) = ctx.vars.iter().find(|(_, v)| v.is_global() && v.ty.as_ref().unwrap().is_fun()).unwrap();
    assert!(f.body.is_some());
}

#[test]
fn function_ending_in_an_else_less_if_still_parses_to_a_closed_body() {
    // Regression check for the dangling-falsejump-at-end-of-body bug.
    let src = "int f(int a) { if (a > 0) { return 1; } }";
    let ctx = parse_program(src, "trailing_if.c").unwrap();
    let (_, f) = ctx.vars.iter().find(|(_, v)| v.is_global() && v.ty.as_ref().unwrap().is_fun()).unwrap();
    assert!(f.body.is_some());
}
