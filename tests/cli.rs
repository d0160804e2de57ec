use std::process::{Command, Output};

use pretty_assertions::assert_eq;

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dump-pickle"))
        .args(args)
        .env_remove("DUMP_PICKLE_CATCH_INVALID_UTF8")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn no_arguments_prints_usage() {
    let out = run(&[]);
    assert_eq!(out.status.code(), Some(2));
    assert!(out.stdout.is_empty());
    let stderr = String::from_utf8(out.stderr).unwrap();
    for form in ["path to a pickle file", "file.zip@member.pkl", "file.zip@*/pattern.*"] {
        assert!(stderr.contains(form), "{stderr}");
    }
    assert!(stderr.contains("only first match will be shown"), "{stderr}");
}

#[test]
fn too_many_arguments() {
    let out = run(&["a.pkl", "b.pkl"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn dumps_file_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.pkl");
    std::fs::write(&path, b"\x80\x02cm\nC\nK\x01K\x02\x86R.").unwrap();
    let out = run(&[path.to_str().unwrap()]);
    assert!(out.status.success());
    assert_eq!(String::from_utf8(out.stdout).unwrap(), "m.C(1, 2)\n");
}

#[test]
fn invalid_utf8_needs_opt_in() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.pkl");
    std::fs::write(&path, b"X\x01\x00\x00\x00\xff.").unwrap();
    let path = path.to_str().unwrap();

    let out = run(&[path]);
    assert!(!out.status.success());
    assert!(out.stdout.is_empty());

    let out = run(&["--catch-invalid-utf8", path]);
    assert!(out.status.success());
    assert_eq!(
        String::from_utf8(out.stdout).unwrap(),
        "builtin.UnicodeDecodeError(\"'utf-8' codec can't decode byte 0xff \
         in position 0: invalid start byte\",)\n"
    );
}

#[test]
fn missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.pkl");
    let out = run(&[path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert!(out.stdout.is_empty());
}
