//! Shared helpers for integration tests: a real server on an ephemeral port
//! and a bare line client.

#![allow(dead_code)]

use filedock_server::{Config, Server, SessionRegistry};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<SessionRegistry>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<filedock_server::Result<()>>,
    pub dir: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(configure: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            root_dir: dir.path().to_path_buf(),
            scan_interval_secs: 1,
            stats_interval_secs: 60,
            ..Config::default()
        };
        configure(&mut config);

        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        let shutdown = server.shutdown_token();
        let handle = tokio::spawn(server.run());

        Self {
            addr,
            registry,
            shutdown,
            handle,
            dir,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Connect and complete the handshake
    pub async fn login(&self, username: &str, role: &str) -> LineClient {
        let mut client = LineClient::connect(self.addr).await;
        let welcome = client.request(&format!("HELLO {username} {role}")).await;
        assert!(welcome.starts_with("WELCOME "), "unexpected welcome: {welcome}");
        client
    }

    /// Poll until the registry reports `count` connected sessions
    pub async fn wait_for_active(&self, count: usize) {
        tokio::time::timeout(READ_TIMEOUT, async {
            while self.registry.active_count() != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(READ_TIMEOUT, self.handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

/// Raw protocol client speaking newline-terminated lines
pub struct LineClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    pub local_addr: SocketAddr,
}

impl LineClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let local_addr = stream.local_addr().unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
            local_addr,
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    /// Write raw bytes, for input that is not valid UTF-8
    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    /// Next line without its terminator, or `None` once the server closed
    pub async fn recv(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = tokio::time::timeout(READ_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line");
        match read {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    pub async fn request(&mut self, line: &str) -> String {
        self.send(line).await;
        self.recv().await.expect("connection closed before reply")
    }

    /// Lines of a `/read` reply up to and excluding the sentinel
    pub async fn read_body(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.recv().await.expect("connection closed mid body");
            if line == filedock_core::READ_SENTINEL {
                return lines;
            }
            lines.push(line);
        }
    }
}

pub fn b64(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Sorted names of the files in `dir`
pub fn dir_listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
