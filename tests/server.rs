//! Drives the server binary over its stdio transport.
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStdin, ChildStdout, Command};

struct Client {
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl Client {
    async fn send(&mut self, message: Value) {
        let mut line = message.to_string();
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await.unwrap();
        self.stdin.flush().await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(30), self.lines.next_line())
            .await
            .expect("no response within 30s")
            .unwrap()
            .expect("server closed stdout");
        serde_json::from_str(&line).unwrap()
    }

    async fn request(&mut self, id: u64, method: &str, params: Value) -> Value {
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        let response = self.recv().await;
        assert_eq!(response["id"], id);
        response
    }
}

fn spawn_server(base: &TempDir) -> (tokio::process::Child, Client) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_code-sandbox"))
        .arg(base.path().join("missing.toml"))
        .env("AGENTIC_SYSTEM_PATH", base.path())
        .env("RUST_LOG", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    let stdin = child.stdin.take().unwrap();
    let stdout = child.stdout.take().unwrap();
    let client = Client {
        stdin,
        lines: BufReader::new(stdout).lines(),
    };
    (child, client)
}

#[tokio::test]
async fn test_session() {
    let base = TempDir::new().unwrap();
    let (mut child, mut client) = spawn_server(&base);

    let init = client
        .request(1, "initialize", json!({"protocolVersion": "2024-11-05", "capabilities": {}}))
        .await;
    assert_eq!(init["result"]["serverInfo"]["name"], "code-execution");
    client
        .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;

    let list = client.request(2, "tools/list", json!({})).await;
    let names: Vec<&str> = list["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"execute_code"));
    assert!(names.contains(&"sanitize_pii"));

    let call = client
        .request(
            3,
            "tools/call",
            json!({"name": "execute_code", "arguments": {"code": "result = 2 ** 10"}}),
        )
        .await;
    assert_eq!(call["result"]["isError"], false);
    assert_eq!(call["result"]["structuredContent"]["result"], 1024);
    assert_eq!(call["result"]["structuredContent"]["outcome"], "success");

    let blocked = client
        .request(
            4,
            "tools/call",
            json!({"name": "execute_code", "arguments": {"code": "import subprocess"}}),
        )
        .await;
    assert_eq!(blocked["result"]["isError"], true);
    assert_eq!(
        blocked["result"]["structuredContent"]["outcome"],
        "capability_violation"
    );

    let unknown = client.request(5, "resources/list", json!({})).await;
    assert_eq!(unknown["error"]["code"], -32601);

    drop(client);
    let status = tokio::time::timeout(Duration::from_secs(10), child.wait())
        .await
        .expect("server did not exit after stdin closed")
        .unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn test_cancelled_execution_frees_the_server() {
    let base = TempDir::new().unwrap();
    let (_child, mut client) = spawn_server(&base);

    client
        .send(json!({
            "jsonrpc": "2.0",
            "id": "slow",
            "method": "tools/call",
            "params": {"name": "execute_code", "arguments": {"code": "while True:\n    pass\n"}}
        }))
        .await;
    client
        .send(json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": {"requestId": "slow"}
        }))
        .await;

    // The cancelled request gets no response; the next one is answered.
    let ping = client.request(7, "ping", json!({})).await;
    assert_eq!(ping["result"], json!({}));
}

#[tokio::test]
async fn test_parse_error_response() {
    let base = TempDir::new().unwrap();
    let (_child, mut client) = spawn_server(&base);

    client.stdin.write_all(b"{oops\n").await.unwrap();
    client.stdin.flush().await.unwrap();
    let response = client.recv().await;
    assert_eq!(response["id"], Value::Null);
    assert_eq!(response["error"]["code"], -32700);
}
