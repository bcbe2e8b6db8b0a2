//! Smoke tests driving the compiled `circ` binary directly, the way
//! `raya-cli`'s own integration tests exercise a real process rather than
//! calling library internals.

use std::io::Write;
use std::process::Command;

fn write_fixture(name: &str, contents: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join("circ-cli-smoke");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    path
}

#[test]
fn renders_a_simple_source_file_to_stdout() {
    let path = write_fixture("simple.c", "int add(int a, int b) { return a + b; }\n");

    let output = Command::new(env!("CARGO_BIN_EXE_circ")).arg(&path).output().expect("failed to run circ");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("add("), "expected the function to render:\n{stdout}");
}

#[test]
fn reports_a_parse_error_on_stderr_and_exits_nonzero() {
    let path = write_fixture("broken.c", "int f( { return 1; }\n");

    let output = Command::new(env!("CARGO_BIN_EXE_circ")).arg(&path).output().expect("failed to run circ");

    assert!(!output.status.success());
    assert!(!output.stderr.is_empty(), "expected a diagnostic on stderr");
}

#[test]
fn rejects_an_unimplemented_machine() {
    let path = write_fixture("trivial.c", "int x;\n");

    let output = Command::new(env!("CARGO_BIN_EXE_circ"))
        .arg(&path)
        .arg("--machine")
        .arg("msvc")
        .output()
        .expect("failed to run circ");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("msvc"), "expected the rejected machine name echoed back:\n{stderr}");
}

#[test]
fn reports_a_missing_file_cleanly() {
    let output = Command::new(env!("CARGO_BIN_EXE_circ"))
        .arg("/nonexistent/path/does-not-exist.c")
        .output()
        .expect("failed to run circ");

    assert!(!output.status.success());
    assert!(!output.stderr.is_empty());
}
