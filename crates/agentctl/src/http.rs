// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal HTTP/1.1 client for the daemon's TCP API.
//!
//! Sends one request per connection and reads responses using
//! Content-Length framing (does not depend on connection close for EOF).

use crate::ControlError;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

pub async fn get(addr: &str, path: &str) -> Result<String, ControlError> {
    let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
    timed_request(addr, &request).await
}

pub async fn post(addr: &str, path: &str, body: &str) -> Result<String, ControlError> {
    let request = format!(
        "POST {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        path,
        body.len(),
        body
    );
    timed_request(addr, &request).await
}

/// Connect, send, and read with a 5-second timeout covering the entire
/// operation. Prevents hangs when the daemon accepts the connection but
/// never responds.
async fn timed_request(addr: &str, request: &str) -> Result<String, ControlError> {
    tokio::time::timeout(Duration::from_secs(5), send_request(addr, request))
        .await
        .map_err(|_| ControlError::Timeout)?
}

async fn send_request(addr: &str, request: &str) -> Result<String, ControlError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| ControlError::Http(format!("connect failed: {}", e)))?;
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| ControlError::Http(format!("write failed: {}", e)))?;

    let mut reader = BufReader::new(&mut stream);
    read_http_response(&mut reader).await
}

/// Read and parse an HTTP/1.1 response from a buffered stream.
pub(crate) async fn read_http_response<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<String, ControlError> {
    let mut status_line = String::new();
    reader
        .read_line(&mut status_line)
        .await
        .map_err(|e| ControlError::Http(format!("read status failed: {}", e)))?;

    let status_code =
        status_line.split_whitespace().nth(1).and_then(|s| s.parse::<u16>().ok()).unwrap_or(0);

    // Read headers, extract Content-Length (case-insensitive)
    let mut content_length: usize = 0;
    loop {
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| ControlError::Http(format!("read header failed: {}", e)))?;
        if line == "\r\n" || line.is_empty() {
            break;
        }
        let line_lower = line.to_ascii_lowercase();
        if let Some(val) = line_lower.strip_prefix("content-length:") {
            content_length = val.trim().parse().unwrap_or(0);
        }
    }

    let body = if content_length > 0 {
        let mut buf = vec![0u8; content_length];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(|e| ControlError::Http(format!("read body failed: {}", e)))?;
        String::from_utf8_lossy(&buf).into_owned()
    } else {
        String::new()
    };

    if status_code >= 400 {
        return Err(ControlError::Http(format!("HTTP {}: {}", status_code, body.trim())));
    }

    Ok(body)
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
