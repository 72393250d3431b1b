// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP WebSocket connection to a daemon stream endpoint.

use crate::ControlError;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::WebSocketStream;

/// Connect a WebSocket to `ws://{addr}{path}`.
///
/// Retries the TCP connect a few times while the daemon finishes binding
/// its listener; the WebSocket handshake itself is attempted once.
pub(crate) async fn connect(
    addr: &str,
    path: &str,
) -> Result<WebSocketStream<TcpStream>, ControlError> {
    let mut stream = None;
    for i in 0..5 {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        match TcpStream::connect(addr).await {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(_) => continue,
        }
    }
    let stream = stream
        .ok_or_else(|| ControlError::WebSocket(format!("tcp connect to {} failed", addr)))?;

    let uri = format!("ws://{}{}", addr, path);
    match tokio_tungstenite::client_async(uri.as_str(), stream).await {
        Ok((ws, _)) => Ok(ws),
        Err(e) => Err(ControlError::WebSocket(format!("handshake failed: {}", e))),
    }
}
