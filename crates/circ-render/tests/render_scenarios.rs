//! End-to-end: parse real C source with `circ-frontend`, render it back with
//! `circ-render`, and check the properties the rendered text must have.

use circ_frontend::parse_program;

// ============================================================================
// Constant folding
// ============================================================================

#[test]
fn const_fold_collapses_to_a_single_literal_assignment() {
    let ctx = parse_program("int x = 1 + 2 * 3;", "const_fold.c").unwrap();
    let out = circ_render::render(&ctx);

    assert!(out.contains("= 7;"), "expected a folded `= 7;` assignment, got:\n{out}");
    assert!(!out.contains(" * "), "no runtime multiplication should remain:\n{out}");
    assert!(!out.contains(" + "), "no runtime addition should remain:\n{out}");
}

// ============================================================================
// Short-circuit `&&`
// ============================================================================

#[test]
fn short_circuit_and_emits_one_cmp_per_operand() {
    let ctx = parse_program("int f(int a, int b) { return a && b; }", "short_circuit.c").unwrap();
    let out = circ_render::render(&ctx);

    let cmp_count = out.matches("if (").count();
    assert_eq!(cmp_count, 2, "expected exactly one cmp per operand, got:\n{out}");
    assert!(out.contains("goto"), "short-circuit lowering should leave goto targets:\n{out}");
}

// ============================================================================
// Recursive struct
// ============================================================================

#[test]
fn recursive_struct_gets_a_forward_declaration() {
    let ctx = parse_program("struct L { struct L *next; int v; };", "recursive_struct.c").unwrap();
    let out = circ_render::render(&ctx);

    let fwd = out.find("struct cid").expect("expected a synthetic forward declaration");
    let def = out[fwd + 1..].find("{").expect("expected a struct body after the forward decl");
    let fwd_line_end = out[fwd..].find(';').unwrap() + fwd;
    assert!(fwd_line_end < fwd + def, "forward declaration must precede the full definition:\n{out}");
    assert!(out.contains("*next"), "pointer field should render as a bare pointer, not by value:\n{out}");
}

#[test]
fn non_recursive_struct_still_renders_its_fields() {
    let ctx = parse_program("struct P { int x; int y; };", "simple_struct.c").unwrap();
    let out = circ_render::render(&ctx);

    assert!(out.contains("int x;"));
    assert!(out.contains("int y;"));
}

// ============================================================================
// Globals and prototypes
// ============================================================================

#[test]
fn extern_prototype_keeps_its_declared_name() {
    let ctx = parse_program("extern int puts(const char *s);", "proto.c").unwrap();
    let out = circ_render::render(&ctx);

    assert!(out.contains("puts("), "extern function should keep its source name:\n{out}");
}

#[test]
fn void_call_does_not_emit_a_dangling_assignment() {
    let src = "extern void g(int); void f(void) { g(1); }";
    let ctx = parse_program(src, "void_call.c").unwrap();
    let out = circ_render::render(&ctx);

    for line in out.lines() {
        let trimmed = line.trim();
        if trimmed.contains("g(") {
            assert!(!trimmed.starts_with("vid") || !trimmed.contains(" = "), "void call must not be assigned: {trimmed}");
        }
    }
}

// ============================================================================
// Typedefs
// ============================================================================

#[test]
fn typedef_renders_before_its_first_use() {
    let ctx = parse_program("typedef int myint; myint x = 1;", "typedef.c").unwrap();
    let out = circ_render::render(&ctx);

    let typedef_pos = out.find("typedef").expect("typedef line missing");
    let use_pos = out.find("x = 1").expect("global use missing");
    assert!(typedef_pos < use_pos);
}
