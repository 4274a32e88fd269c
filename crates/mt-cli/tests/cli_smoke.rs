use std::path::PathBuf;
use std::process::{Command, Output};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mutag"))
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

#[test]
fn version_prints_json() {
    let out = run(&["version"]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("stdout should be valid JSON");
    assert_eq!(v["tool"], "mutag");
    assert_eq!(v["version"].as_str(), Some(env!("CARGO_PKG_VERSION")));
}

#[test]
fn help_lists_subcommands() {
    let out = run(&["--help"]);
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    for cmd in ["run", "datacards", "combine-cards", "fit-all", "reweighting", "prescales", "sf-summary"] {
        assert!(text.contains(cmd), "missing {cmd} in help:\n{text}");
    }
}

#[test]
fn bad_invocations_fail() {
    assert!(!run(&["no-such-command"]).status.success());
    assert!(!run(&["sf-summary", "/nonexistent/mutag/base", "-o", "/nonexistent/out"]).status.success());
    let out = run(&["run", "/nonexistent/mutag/config.yaml"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("failed to load configuration"));
}
