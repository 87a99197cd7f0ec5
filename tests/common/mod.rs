//! Scripted mock engines for integration tests.
//!
//! Each mock accepts connections on a fresh socket and hands every
//! connection to a handler that speaks literal HTTP/1.1.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use moby_transport::demux::{encode_frame, StreamId};
use moby_transport::{AgentOptions, AgentRegistry, ConnectionSpec};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

pub trait Socket: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Socket for T {}

/// A connection to the mock engine, buffered for line-oriented parsing.
pub type Conn = BufReader<Box<dyn Socket>>;

/// Start a TCP mock engine on an ephemeral port.
pub async fn start_tcp_daemon<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(Conn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let boxed: Box<dyn Socket> = Box::new(socket);
            tokio::spawn(handler(BufReader::new(boxed)));
        }
    });

    addr
}

/// Start a unix socket mock engine at `path`.
#[cfg(unix)]
pub fn start_unix_daemon<F, Fut>(path: &std::path::Path, handler: F)
where
    F: Fn(Conn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::UnixListener::bind(path).unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let boxed: Box<dyn Socket> = Box::new(socket);
            tokio::spawn(handler(BufReader::new(boxed)));
        }
    });
}

/// A parsed request head plus its body.
#[derive(Debug, Default)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    /// Header names lowercased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MockRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Read one request. Returns `None` once the client closes the connection.
pub async fn read_request(conn: &mut Conn) -> Option<MockRequest> {
    let mut line = String::new();
    if conn.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let mut parts = line.split_whitespace();
    let mut request = MockRequest {
        method: parts.next()?.to_string(),
        path: parts.next()?.to_string(),
        ..MockRequest::default()
    };

    loop {
        line.clear();
        conn.read_line(&mut line).await.ok()?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        let (name, value) = trimmed.split_once(':')?;
        request
            .headers
            .push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    if let Some(len) = request.header("content-length") {
        let len: usize = len.parse().ok()?;
        request.body = vec![0; len];
        conn.read_exact(&mut request.body).await.ok()?;
    } else if request
        .header("transfer-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    {
        request.body = read_chunked(conn).await?;
    }

    Some(request)
}

async fn read_chunked(conn: &mut Conn) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        conn.read_line(&mut line).await.ok()?;
        let size = usize::from_str_radix(line.trim().split(';').next()?, 16).ok()?;
        let mut chunk = vec![0; size + 2];
        conn.read_exact(&mut chunk).await.ok()?;
        if size == 0 {
            return Some(body);
        }
        body.extend_from_slice(&chunk[..size]);
    }
}

/// Write a complete response with a fixed-length body.
pub async fn respond(conn: &mut Conn, status: &str, content_type: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    let socket = conn.get_mut();
    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(body).await;
    let _ = socket.flush().await;
}

/// Accept the upgrade, labelling the stream with `content_type` if given.
pub async fn switch_protocols(conn: &mut Conn, content_type: Option<&str>) {
    let mut head = String::from("HTTP/1.1 101 UPGRADED\r\n");
    if let Some(content_type) = content_type {
        head.push_str(&format!("Content-Type: {content_type}\r\n"));
    }
    head.push_str("Connection: Upgrade\r\nUpgrade: tcp\r\n\r\n");
    let socket = conn.get_mut();
    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.flush().await;
}

pub async fn write_frame(conn: &mut Conn, stream: StreamId, payload: &[u8]) {
    let frame: Bytes = encode_frame(stream, payload).unwrap();
    let socket = conn.get_mut();
    let _ = socket.write_all(&frame).await;
    let _ = socket.flush().await;
}

/// Answer every request on the connection with `200 OK` and body `OK`.
pub async fn serve_ping(mut conn: Conn) {
    while let Some(request) = read_request(&mut conn).await {
        if request.path.ends_with("/_ping") {
            respond(&mut conn, "200 OK", "text/plain", b"OK").await;
        } else {
            respond(
                &mut conn,
                "404 Not Found",
                "application/json",
                br#"{"message":"page not found"}"#,
            )
            .await;
        }
    }
}

pub fn tcp_spec(addr: SocketAddr) -> ConnectionSpec {
    ConnectionSpec::Tcp {
        host: addr.ip().to_string(),
        port: addr.port(),
        tls: None,
        path_prefix: None,
    }
}

pub fn agent(spec: ConnectionSpec, identity: &str) -> (moby_transport::Agent, AgentRegistry) {
    let registry = AgentRegistry::new();
    let agent = moby_transport::Agent::connect(spec, AgentOptions::new(identity), &registry).unwrap();
    (agent, registry)
}
