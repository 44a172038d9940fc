//! HTTP update ingress.
//!
//! A deliberately small HTTP/1.1 surface in front of the router:
//!
//! - `PUT /update/<token>` with form body `version=<i64>` - public
//!   ingress used by application servers holding a minted endpoint.
//! - `PUT /fwd/<token>` - internal: terminal delivery of an update a
//!   peer already persisted.
//! - `POST /evict/<uaid>` - internal: close the local session after a
//!   newer claim elsewhere.

use crate::error::ProtoError;
use crate::router::Router;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const MAX_REQUEST_BYTES: usize = 8192;

/// Bind the ingress listener. The returned address feeds the
/// advertised endpoint base.
pub async fn bind(bind_addr: &str) -> Result<TcpListener> {
    TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind update ingress on {bind_addr}"))
}

/// Spawn the accept loop on an already-bound listener.
pub fn serve(listener: TcpListener, router: Arc<Router>) {
    tracing::info!(
        "update ingress listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string())
    );
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _addr)) => {
                    let router = router.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_conn(&mut socket, &router).await {
                            tracing::warn!("update handler error: {err:?}");
                        }
                    });
                }
                Err(err) => {
                    tracing::warn!("update accept error: {err:?}");
                }
            }
        }
    });
}

async fn handle_conn(socket: &mut TcpStream, router: &Arc<Router>) -> Result<()> {
    let request = match read_request(socket).await? {
        Some(request) => request,
        None => return Ok(()),
    };

    let (status, body) = route(router, &request);
    respond(socket, status, &body).await
}

struct Request {
    method: String,
    path: String,
    body: String,
}

async fn read_request(socket: &mut TcpStream) -> Result<Option<Request>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_REQUEST_BYTES {
            return Ok(None);
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let first = lines.next().unwrap_or("");
    let mut parts = first.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("/").to_string();

    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Ok(None);
    }

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(Some(Request {
        method,
        path,
        body: String::from_utf8_lossy(&body).to_string(),
    }))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn route(router: &Arc<Router>, request: &Request) -> (u16, String) {
    match (request.method.as_str(), request.path.as_str()) {
        ("PUT", path) if path.starts_with("/update/") => {
            let token = &path["/update/".len()..];
            match form_version(&request.body) {
                Some(version) => match router.submit_update(token, version) {
                    Ok(_) => (200, "{}".to_string()),
                    Err(err) => error_body(err),
                },
                None => (400, r#"{"error":"invalid version"}"#.to_string()),
            }
        }
        ("PUT", path) if path.starts_with("/fwd/") => {
            let token = &path["/fwd/".len()..];
            match form_version(&request.body) {
                Some(version) => match router.deliver_forwarded(token, version) {
                    Ok(_) => (200, "{}".to_string()),
                    Err(err) => error_body(err),
                },
                None => (400, r#"{"error":"invalid version"}"#.to_string()),
            }
        }
        ("POST", path) if path.starts_with("/evict/") => {
            let uaid = &path["/evict/".len()..];
            router.evict_local(uaid);
            (200, "{}".to_string())
        }
        _ => (404, r#"{"error":"not found"}"#.to_string()),
    }
}

fn error_body(err: ProtoError) -> (u16, String) {
    (err.status(), format!(r#"{{"error":"{err}"}}"#))
}

/// Extract the `version` form value.
fn form_version(body: &str) -> Option<i64> {
    body.split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == "version")
        .and_then(|(_, value)| value.trim().parse::<i64>().ok())
}

async fn respond(socket: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await?;
    Ok(())
}
