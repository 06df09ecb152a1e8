use assert_cmd::Command;

const FLATTENED: &str = "\
# File: src/app.py
import os

def main():
    # TODO: read the port from the environment
    return 8080

# File: src/util.py
def helper():
    return 'todos are not markers'

# File: README.md
FIXME: write usage
";

#[test]
fn lists_files_with_markers() {
    let temp = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("aifixer").unwrap();
    cmd.env("XDG_CONFIG_HOME", temp.path())
        .env_remove("OPENROUTER_API_KEY")
        .arg("--list-todo-files")
        .write_stdin(FLATTENED)
        .assert()
        .success()
        .stdout("src/app.py\nREADME.md\n");
}

#[test]
fn reports_when_nothing_is_found() {
    let temp = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("aifixer").unwrap();
    cmd.env("XDG_CONFIG_HOME", temp.path())
        .env_remove("OPENROUTER_API_KEY")
        .arg("--list-todo-files")
        .write_stdin("# File: a.py\nprint('done')\n")
        .assert()
        .success()
        .stdout("No TODOs found.\n");
}

#[test]
fn json_listing() {
    let temp = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("aifixer").unwrap();
    let assert = cmd
        .env("XDG_CONFIG_HOME", temp.path())
        .args(["--list-todo-files", "--json"])
        .write_stdin(FLATTENED)
        .assert()
        .success();
    let v: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(v["files"], serde_json::json!(["src/app.py", "README.md"]));
}
