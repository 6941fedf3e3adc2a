//! End-to-end gpg-agent proxy tests with a stub Assuan server

use agent_proxy::agent::{AgentProxy, Upstream};
use agent_proxy::filter::KeyAllowList;
use agent_proxy::logging::{AuditEventKind, MemorySink};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};

/// Start a stub gpg-agent that greets, answers `OK` to every command and
/// records what it received
fn start_stub_agent(socket_path: &Path) -> Arc<Mutex<Vec<String>>> {
    start_scripted_agent(socket_path, |_| "OK\n")
}

/// Like gpg-agent: empty lines and comments are ignored, data lines outside
/// an inquiry are rejected
fn agent_reply(line: &str) -> &'static str {
    match line {
        "" => "",
        l if l.starts_with('#') => "",
        l if l.starts_with("D ") => "ERR 536871187 Unexpected command\n",
        "PKSIGN" => "S PROGRESS sign 1\nD (7:sig-val(3:rsa(1:s1:x)))\nOK\nS LATE\n",
        _ => "OK\n",
    }
}

/// Start a stub gpg-agent that writes `reply(line)` for every line it
/// receives (nothing for an empty reply)
fn start_scripted_agent(socket_path: &Path, reply: fn(&str) -> &'static str) -> Arc<Mutex<Vec<String>>> {
    let listener = UnixListener::bind(socket_path).unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&received);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let (reader, mut writer) = stream.into_split();
                writer.write_all(b"OK Pleased to meet you\n").await.unwrap();
                let mut lines = BufReader::new(reader).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let answer = reply(&line);
                    log.lock().unwrap().push(line);
                    if !answer.is_empty() && writer.write_all(answer.as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    received
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(path: &Path) -> Self {
        let stream = UnixStream::connect(path).await.unwrap();
        let (reader, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
        };
        assert_eq!(client.read().await, "OK Pleased to meet you");
        client
    }

    async fn command(&mut self, line: &str) -> String {
        self.send(line).await;
        self.read().await
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .unwrap();
    }

    async fn read(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }
}

fn start_proxy(temp_dir: &TempDir, upstream: &Path, allowed: &[&str], sink: Arc<MemorySink>) -> AgentProxy {
    let proxy = AgentProxy::gpg(Upstream::new(upstream), KeyAllowList::new(allowed.iter().copied()))
        .unwrap()
        .with_sockets_root(temp_dir.path().join("root"))
        .with_audit_sink(sink);
    proxy.start().unwrap();
    proxy
}

#[tokio::test]
async fn test_empty_allow_list_forwards_sign() {
    let temp_dir = TempDir::new().unwrap();
    let upstream_path = temp_dir.path().join("S.gpg-agent");
    let received = start_stub_agent(&upstream_path);

    let proxy = start_proxy(&temp_dir, &upstream_path, &[], Arc::new(MemorySink::new()));
    let mut client = Client::connect(&proxy.endpoint_path().unwrap()).await;

    assert_eq!(client.command("SIGKEY DEADBEEF").await, "OK");
    assert_eq!(client.command("PKSIGN").await, "OK");
    drop(client);

    proxy.stop().await.unwrap();
    assert_eq!(*received.lock().unwrap(), vec!["SIGKEY DEADBEEF", "PKSIGN"]);
}

#[tokio::test]
async fn test_disallowed_key_gets_error_line() {
    let temp_dir = TempDir::new().unwrap();
    let upstream_path = temp_dir.path().join("S.gpg-agent");
    let received = start_stub_agent(&upstream_path);

    let sink = Arc::new(MemorySink::new());
    let proxy = start_proxy(&temp_dir, &upstream_path, &["CAFEBABE"], sink.clone());
    let mut client = Client::connect(&proxy.endpoint_path().unwrap()).await;

    assert_eq!(client.command("SIGKEY DEADBEEF").await, "OK");
    let reply = client.command("PKSIGN").await;
    assert!(reply.starts_with("ERR "), "unexpected reply {}", reply);
    assert!(reply.contains("Key not allowed by proxy"));

    // The connection stays usable after a denial
    assert_eq!(client.command("GETINFO version").await, "OK");
    drop(client);

    proxy.stop().await.unwrap();
    let received = received.lock().unwrap();
    assert!(!received.iter().any(|l| l.starts_with("PKSIGN")));
    assert_eq!(*received, vec!["SIGKEY DEADBEEF", "GETINFO version"]);

    let ops = sink.events_of(AuditEventKind::KeyOperation);
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].key_id.as_deref(), Some("DEADBEEF"));
    assert_eq!(ops[0].allowed, Some(false));
}

#[tokio::test]
async fn test_allowed_suffix_forwards_decrypt() {
    let temp_dir = TempDir::new().unwrap();
    let upstream_path = temp_dir.path().join("S.gpg-agent");
    let received = start_stub_agent(&upstream_path);

    let proxy = start_proxy(
        &temp_dir,
        &upstream_path,
        &["90ABCD1234"],
        Arc::new(MemorySink::new()),
    );
    let mut client = Client::connect(&proxy.endpoint_path().unwrap()).await;

    assert_eq!(client.command("SETKEY abcd1234").await, "OK");
    assert_eq!(client.command("PKDECRYPT").await, "OK");
    drop(client);

    proxy.stop().await.unwrap();
    assert_eq!(*received.lock().unwrap(), vec!["SETKEY abcd1234", "PKDECRYPT"]);
}

#[tokio::test]
async fn test_sessions_track_keys_independently() {
    let temp_dir = TempDir::new().unwrap();
    let upstream_path = temp_dir.path().join("S.gpg-agent");
    start_stub_agent(&upstream_path);

    let proxy = start_proxy(&temp_dir, &upstream_path, &["CAFEBABE"], Arc::new(MemorySink::new()));
    let endpoint = proxy.endpoint_path().unwrap();
    let mut allowed = Client::connect(&endpoint).await;
    let mut denied = Client::connect(&endpoint).await;

    assert_eq!(allowed.command("SIGKEY CAFEBABE").await, "OK");
    assert_eq!(denied.command("SIGKEY DEADBEEF").await, "OK");
    assert_eq!(allowed.command("PKSIGN").await, "OK");
    assert!(denied.command("PKSIGN").await.starts_with("ERR "));
    drop(allowed);
    drop(denied);

    proxy.stop().await.unwrap();
}

#[tokio::test]
async fn test_allowed_sign_relays_response_up_to_ok() {
    let temp_dir = TempDir::new().unwrap();
    let upstream_path = temp_dir.path().join("S.gpg-agent");
    start_scripted_agent(&upstream_path, agent_reply);

    let proxy = start_proxy(&temp_dir, &upstream_path, &["CAFEBABE"], Arc::new(MemorySink::new()));
    let mut client = Client::connect(&proxy.endpoint_path().unwrap()).await;

    assert_eq!(client.command("SIGKEY CAFEBABE").await, "OK");
    assert_eq!(client.command("PKSIGN").await, "S PROGRESS sign 1");
    assert_eq!(client.read().await, "D (7:sig-val(3:rsa(1:s1:x)))");
    assert_eq!(client.read().await, "OK");

    // Nothing past the terminating line is relayed until the next command
    let early = tokio::time::timeout(Duration::from_millis(200), client.read()).await;
    assert!(early.is_err(), "line relayed after OK: {:?}", early);

    assert_eq!(client.command("NOP").await, "S LATE");
    assert_eq!(client.read().await, "OK");
    drop(client);

    proxy.stop().await.unwrap();
}

#[tokio::test]
async fn test_empty_line_does_not_stall_session() {
    let temp_dir = TempDir::new().unwrap();
    let upstream_path = temp_dir.path().join("S.gpg-agent");
    let received = start_scripted_agent(&upstream_path, agent_reply);

    let proxy = start_proxy(&temp_dir, &upstream_path, &[], Arc::new(MemorySink::new()));
    let mut client = Client::connect(&proxy.endpoint_path().unwrap()).await;

    client.send("").await;
    let reply = tokio::time::timeout(Duration::from_secs(2), client.command("NOP")).await;
    assert_eq!(reply.unwrap(), "OK");
    drop(client);

    tokio::time::timeout(Duration::from_secs(3), proxy.stop())
        .await
        .expect("stop did not return after the client closed")
        .unwrap();
    assert_eq!(*received.lock().unwrap(), vec!["", "NOP"]);
}

#[tokio::test]
async fn test_stray_data_line_keeps_replies_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let upstream_path = temp_dir.path().join("S.gpg-agent");
    start_scripted_agent(&upstream_path, agent_reply);

    let proxy = start_proxy(&temp_dir, &upstream_path, &[], Arc::new(MemorySink::new()));
    let mut client = Client::connect(&proxy.endpoint_path().unwrap()).await;

    assert_eq!(client.command("D stray").await, "ERR 536871187 Unexpected command");
    assert_eq!(client.command("GETINFO version").await, "OK");
    drop(client);

    proxy.stop().await.unwrap();
}
