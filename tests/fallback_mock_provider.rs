use assert_cmd::Command;
use mockito::Matcher;
use predicates::str::contains;
use std::fs;

const INPUT: &str = "def add(a, b):\n    # TODO: implement\n    pass\n";
const FIXED: &str = "def add(a, b):\n    return a + b\n";

fn chat_body(content: &str) -> String {
    serde_json::json!({"choices": [{"message": {"role": "assistant", "content": content}}]}).to_string()
}

fn for_model(model: &str) -> Matcher {
    Matcher::PartialJson(serde_json::json!({ "model": model }))
}

fn aifixer(config_home: &std::path::Path, remote: &str) -> Command {
    let mut cmd = Command::cargo_bin("aifixer").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home)
        .env("AIFIXER_REMOTE_BASE", remote)
        .env("AIFIXER_LOCAL_BASE", "http://127.0.0.1:9/api")
        .env("OPENROUTER_API_KEY", "sk-test")
        .env_remove("RUST_LOG")
        .args(["--backoff-ms", "0", "--timeout", "5"]);
    cmd
}

#[test]
fn primary_succeeds_and_output_is_written_verbatim() {
    let mut server = mockito::Server::new();
    let chat = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(for_model("a/primary"))
        .with_status(200)
        .with_body(chat_body(FIXED))
        .expect(1)
        .create();
    let temp = tempfile::tempdir().unwrap();
    aifixer(temp.path(), &server.url())
        .args(["--model", "a/primary", "--fallback", "b/unused"])
        .write_stdin(INPUT)
        .assert()
        .success()
        .stdout(FIXED);
    chat.assert();
}

#[test]
fn rate_limited_primary_falls_back() {
    let mut server = mockito::Server::new();
    let limited = server
        .mock("POST", "/chat/completions")
        .match_body(for_model("a/limited:free"))
        .with_status(429)
        .with_body(r#"{"error":{"message":"Rate limit exceeded: free-models-per-min","code":429}}"#)
        .expect(1)
        .create();
    let good = server
        .mock("POST", "/chat/completions")
        .match_body(for_model("b/good"))
        .with_status(200)
        .with_body(chat_body(FIXED))
        .expect(1)
        .create();
    let temp = tempfile::tempdir().unwrap();
    aifixer(temp.path(), &server.url())
        .args(["--model", "a/limited:free", "--fallback", "b/good"])
        .write_stdin(INPUT)
        .assert()
        .success()
        .stdout(FIXED)
        .stderr(contains("a/limited:free"));
    limited.assert();
    good.assert();
}

#[test]
fn unusable_output_on_every_model_is_exhaustion() {
    let mut server = mockito::Server::new();
    let chat = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(chat_body("null"))
        .expect(3)
        .create();
    let temp = tempfile::tempdir().unwrap();
    let assert = aifixer(temp.path(), &server.url())
        .args(["--json", "--model", "m/one", "--fallback", "m/two", "--fallback", "m/three", "--fallback", "m/four"])
        .write_stdin(INPUT)
        .assert()
        .failure()
        .code(1);
    let v: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(v["code"], "exhausted");
    let message = v["message"].as_str().unwrap();
    assert!(message.contains("m/three"), "{message}");
    assert!(!message.contains("m/four"));
    chat.assert();
}

#[test]
fn json_report_lists_attempts() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/chat/completions")
        .match_body(for_model("x/broken"))
        .with_status(200)
        .with_body(r#"{"error":{"message":"upstream overloaded"}}"#)
        .create();
    server
        .mock("POST", "/chat/completions")
        .match_body(for_model("y/works"))
        .with_status(200)
        .with_body(chat_body(FIXED))
        .create();
    let temp = tempfile::tempdir().unwrap();
    let assert = aifixer(temp.path(), &server.url())
        .args(["--json", "--model", "x/broken", "--fallback", "y/works"])
        .write_stdin(INPUT)
        .assert()
        .success();
    let v: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(v["model"], "y/works");
    assert_eq!(v["content"], FIXED);
    let attempts = v["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0]["succeeded"], false);
    assert_eq!(attempts[0]["error_class"], "backend");
    assert!(attempts[0]["error_message"].as_str().unwrap().contains("upstream overloaded"));
    assert_eq!(attempts[1]["succeeded"], true);
}

#[test]
fn fix_file_only_strips_fences() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("complete fixed version of that file".into()))
        .with_status(200)
        .with_body(chat_body("Here is the file:\n```python\nimport os\n\nprint(os.name)\n```\nLet me know!"))
        .expect(1)
        .create();
    let temp = tempfile::tempdir().unwrap();
    aifixer(temp.path(), &server.url())
        .args(["--fix-file-only", "--target-file", "app.py"])
        .write_stdin("# File: app.py\nimport os\n# TODO print the os name\n")
        .assert()
        .success()
        .stdout("import os\n\nprint(os.name)");
}

#[test]
fn config_file_supplies_model_and_prompt() {
    let mut server = mockito::Server::new();
    let chat = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::AllOf(vec![
            for_model("cfg/model"),
            Matcher::Regex("Please fix: def add".into()),
        ]))
        .with_status(200)
        .with_body(chat_body(FIXED))
        .expect(1)
        .create();
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("aifixer");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.toml"), "model = \"cfg/model\"\nprompt = \"Please fix: \"\n").unwrap();
    aifixer(temp.path(), &server.url())
        .write_stdin(INPUT)
        .assert()
        .success()
        .stdout(FIXED);
    chat.assert();
}

#[test]
fn free_mode_picks_from_catalog() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/models")
        .with_status(200)
        .with_body(
            serde_json::json!({"data": [
                {"id": "paid/model", "context_length": 200000, "pricing": {"prompt": "0.000003", "completion": "0.000015"}},
                {"id": "openrouter/auto", "pricing": {"prompt": "-1", "completion": "-1"}},
                {"id": "small/free:free", "context_length": 8192, "pricing": {"prompt": "0", "completion": "0"}},
                {"id": "big/free:free", "context_length": 131072, "pricing": {"prompt": "0", "completion": "0"}}
            ]})
            .to_string(),
        )
        .create();
    let chat = server
        .mock("POST", "/chat/completions")
        .match_body(for_model("big/free:free"))
        .with_status(200)
        .with_body(chat_body(FIXED))
        .expect(1)
        .create();
    let temp = tempfile::tempdir().unwrap();
    let assert = aifixer(temp.path(), &server.url())
        .args(["--free", "--json"])
        .write_stdin(INPUT)
        .assert()
        .success();
    let v: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(v["model"], "big/free:free");
    chat.assert();
}

#[test]
fn local_model_runs_first_then_remote() {
    let mut local = mockito::Server::new();
    let missing = local
        .mock("POST", "/chat")
        .match_body(Matcher::PartialJson(serde_json::json!({"model": "llama3", "stream": false})))
        .with_status(404)
        .with_body(r#"{"error":"model 'llama3' not found"}"#)
        .expect(1)
        .create();
    let mut remote = mockito::Server::new();
    let chat = remote
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(chat_body(FIXED))
        .expect(1)
        .create();
    let temp = tempfile::tempdir().unwrap();
    aifixer(temp.path(), &remote.url())
        .env("AIFIXER_LOCAL_BASE", local.url())
        .args(["--local-model", "llama3"])
        .write_stdin(INPUT)
        .assert()
        .success()
        .stdout(FIXED)
        .stderr(contains("not found"));
    missing.assert();
    chat.assert();
}

#[test]
fn local_only_without_key() {
    let mut local = mockito::Server::new();
    let chat = local
        .mock("POST", "/chat")
        .with_status(200)
        .with_body(
            serde_json::json!({"model": "llama3", "message": {"role": "assistant", "content": FIXED}, "done": true}).to_string(),
        )
        .expect(1)
        .create();
    let temp = tempfile::tempdir().unwrap();
    aifixer(temp.path(), "http://127.0.0.1:9/api/v1")
        .env_remove("OPENROUTER_API_KEY")
        .env("AIFIXER_LOCAL_BASE", local.url())
        .args(["--ollama-model", "llama3"])
        .write_stdin(INPUT)
        .assert()
        .success()
        .stdout(FIXED);
    chat.assert();
}

#[test]
fn unreachable_local_service_without_key_fails() {
    let temp = tempfile::tempdir().unwrap();
    aifixer(temp.path(), "http://127.0.0.1:9/api/v1")
        .env_remove("OPENROUTER_API_KEY")
        .args(["--local-model", "llama3"])
        .write_stdin(INPUT)
        .assert()
        .failure()
        .code(1)
        .stdout("")
        .stderr(contains("error[exhaustion]"))
        .stderr(contains("cannot connect"));
}
