//! Shared test fixtures for config, secret store, auth and data API tests.
//!
//! Everything here is std + tokio only: a temp-dir fixture, a secret store
//! that counts reads and can be told to fail, and a tiny scripted HTTP
//! server that records what it received.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::error::SecretError;
use crate::secrets::SecretStore;

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary directory fixture with best-effort cleanup.
#[derive(Debug)]
pub struct TestTempDir {
    path: PathBuf,
}

impl TestTempDir {
    /// Create a unique temporary directory with a readable prefix.
    pub fn new(prefix: &str) -> Self {
        let suffix = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let dir = std::env::temp_dir().join(format!("qblink-{prefix}-{millis}-{suffix}"));
        fs::create_dir_all(&dir).expect("failed to create temporary fixture directory");
        Self { path: dir }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build a child path under the fixture root.
    pub fn child(&self, relative: &str) -> PathBuf {
        self.path.join(relative)
    }

    /// Write UTF-8 text to a child path, creating parent directories as needed.
    pub fn write_text(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.child(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent directories for fixture");
        }
        fs::write(&path, content).expect("failed to write fixture file");
        path
    }
}

impl Drop for TestTempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

// ---------------------------------------------------------------------------
// CountingSecretStore
// ---------------------------------------------------------------------------

/// In-memory secret store that records reads and writes.
#[derive(Debug, Default)]
pub struct CountingSecretStore {
    values: Mutex<BTreeMap<String, String>>,
    reads: Mutex<BTreeMap<String, usize>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
    read_delay: Option<Duration>,
}

impl CountingSecretStore {
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    /// Sleep this long inside every read, to widen race windows.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn read_count(&self, name: &str) -> usize {
        self.reads
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    /// Number of successful write or delete calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), SecretError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SecretError::Invalid("secret store is read-only".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for CountingSecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>, SecretError> {
        *self.reads.lock().unwrap().entry(name.to_string()).or_default() += 1;
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.values.lock().unwrap().get(name).cloned())
    }

    async fn set_secret(&self, name: &str, value: &str) -> Result<(), SecretError> {
        self.set_secrets(&[(name, value)]).await
    }

    async fn delete_secret(&self, name: &str) -> Result<(), SecretError> {
        self.check_writable()?;
        self.values.lock().unwrap().remove(name);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_secrets(&self, entries: &[(&str, &str)]) -> Result<(), SecretError> {
        self.check_writable()?;
        let mut values = self.values.lock().unwrap();
        for (name, value) in entries {
            values.insert((*name).to_string(), (*value).to_string());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedServer
// ---------------------------------------------------------------------------

/// One canned HTTP response.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
    delay: Option<Duration>,
}

impl ScriptedResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Wait before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn to_wire(&self) -> String {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status));
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.body.len(),
            self.body
        ));
        out
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}

/// Request as seen by [`ScriptedServer`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path plus query string, percent-encoded as sent.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Default)]
struct ServerState {
    responses: VecDeque<ScriptedResponse>,
    requests: Vec<RecordedRequest>,
}

/// Loopback HTTP/1.1 server that answers with a fixed script, one response
/// per connection. Unscripted requests get a 500.
pub struct ScriptedServer {
    addr: std::net::SocketAddr,
    state: Arc<Mutex<ServerState>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl ScriptedServer {
    pub async fn start(responses: Vec<ScriptedResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(Mutex::new(ServerState {
            responses: responses.into(),
            requests: Vec::new(),
        }));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let state = Arc::clone(&state);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        serve_connection(stream, state).await;
                    });
                }
            })
        };

        Self {
            addr,
            state,
            connections,
            task,
        }
    }

    /// Absolute URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(mut stream: TcpStream, state: Arc<Mutex<ServerState>>) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };
    let response = {
        let mut state = state.lock().unwrap();
        state.requests.push(request);
        state
            .responses
            .pop_front()
            .unwrap_or_else(|| ScriptedResponse::json(500, r#"{"error":"unscripted"}"#))
    };
    if let Some(delay) = response.delay {
        tokio::time::sleep(delay).await;
    }
    let _ = stream.write_all(response.to_wire().as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        raw.extend_from_slice(&chunk[..read]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    while raw.len() < header_end + content_length {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
    }
    let body_end = raw.len().min(header_end + content_length);
    let body = String::from_utf8_lossy(&raw[header_end..body_end]).to_string();

    Some(RecordedRequest {
        method,
        path,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_dir_fixture_writes_and_resolves_paths() {
        let fixture = TestTempDir::new("fixture");
        let file = fixture.write_text("nested/file.txt", "hello");
        assert_eq!(fs::read_to_string(file).unwrap(), "hello");
    }

    #[tokio::test]
    async fn scripted_server_records_requests_in_order() {
        let server = ScriptedServer::start(vec![
            ScriptedResponse::json(201, r#"{"n":1}"#).with_header("X-Test", "yes"),
        ])
        .await;
        let client = reqwest::Client::new();
        let response = client
            .post(server.url("/echo?x=1"))
            .body("payload")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 201);
        assert_eq!(response.headers()["x-test"], "yes");

        let second = client.get(server.url("/missing")).send().await.unwrap();
        assert_eq!(second.status().as_u16(), 500);

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].path, "/echo?x=1");
        assert_eq!(requests[0].body, "payload");
        assert_eq!(server.connection_count(), 2);
    }

    #[tokio::test]
    async fn counting_store_tracks_reads_and_failures() {
        let store = CountingSecretStore::with_entries([("a", "1")]);
        assert_eq!(store.get_secret("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.read_count("a"), 1);

        store.fail_writes(true);
        assert!(store.set_secret("a", "2").await.is_err());
        assert_eq!(store.write_count(), 0);
        assert_eq!(store.get_secret("a").await.unwrap().as_deref(), Some("1"));
    }
}
