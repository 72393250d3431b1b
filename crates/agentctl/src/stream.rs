// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent event stream with request/response correlation, plus the
//! read-only event streams (permissions, workspace).
//!
//! One background task owns the WebSocket. Requests flow in over a
//! command channel and are matched to responses by frame id; event frames
//! fan out over an mpsc channel consumed serially by the engine's ingest
//! task, which preserves daemon emission order per execution.

use crate::ControlError;
use futures_util::{SinkExt, StreamExt};
use kandev_wire::{Action, AgentStreamEvent, Frame, FrameKind};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One in-flight request handed to the stream's IO task.
pub struct StreamCommand {
    pub frame: Frame,
    pub reply: oneshot::Sender<Result<Frame, ControlError>>,
}

/// Handle to the agent event stream.
///
/// `request` sends a correlated protocol request; `take_events` hands the
/// single event receiver to the engine's ingest task.
pub struct AgentStream {
    cmd_tx: mpsc::Sender<StreamCommand>,
    events: Mutex<Option<mpsc::Receiver<AgentStreamEvent>>>,
    next_id: AtomicU64,
}

/// Server half of [`AgentStream::pair`], used by fakes to answer
/// requests and inject events.
pub struct AgentStreamDriver {
    pub commands: mpsc::Receiver<StreamCommand>,
    pub events: mpsc::Sender<AgentStreamEvent>,
}

impl AgentStream {
    /// Wrap a connected WebSocket, spawning the IO task.
    pub(crate) fn connect(ws: WebSocketStream<TcpStream>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(io_task(ws, cmd_rx, event_tx));
        Self {
            cmd_tx,
            events: Mutex::new(Some(event_rx)),
            next_id: AtomicU64::new(1),
        }
    }

    /// In-process stream pair with no socket. The driver side stands in
    /// for the daemon.
    pub fn pair() -> (Self, AgentStreamDriver) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let stream = Self {
            cmd_tx,
            events: Mutex::new(Some(event_rx)),
            next_id: AtomicU64::new(1),
        };
        let driver = AgentStreamDriver { commands: cmd_rx, events: event_tx };
        (stream, driver)
    }

    /// Send a protocol request and await its correlated response.
    pub async fn request<Req, Resp>(
        &self,
        action: Action,
        body: &Req,
        timeout: Duration,
    ) -> Result<Resp, ControlError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::request(id, action, body)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(StreamCommand { frame, reply: reply_tx })
            .await
            .map_err(|_| ControlError::StreamNotConnected)?;

        let frame = tokio::time::timeout(timeout, reply_rx)
            .await
            .map_err(|_| ControlError::Timeout)?
            .map_err(|_| ControlError::StreamNotConnected)??;

        match frame.kind {
            FrameKind::Error => {
                if frame.is_method_not_found() {
                    Err(ControlError::MethodNotFound)
                } else {
                    Err(ControlError::Remote(frame.error_message()))
                }
            }
            _ => serde_json::from_value(frame.data)
                .map_err(|e| ControlError::Wire(kandev_wire::WireError::Malformed(e))),
        }
    }

    /// Fire a request without waiting for the response body.
    ///
    /// The reply is still correlated so transport failures surface, but
    /// the caller only learns ok/err — used for `agent.prompt`, whose
    /// completion arrives as a stream event.
    pub async fn request_ack<Req>(
        &self,
        action: Action,
        body: &Req,
        timeout: Duration,
    ) -> Result<(), ControlError>
    where
        Req: Serialize + Sync,
    {
        let _: serde_json::Value = self.request(action, body, timeout).await?;
        Ok(())
    }

    /// Take the event receiver. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::Receiver<AgentStreamEvent>> {
        self.events.lock().take()
    }

    /// Whether the IO task is still accepting requests.
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// Background task owning the WebSocket for an agent stream.
async fn io_task(
    ws: WebSocketStream<TcpStream>,
    mut cmd_rx: mpsc::Receiver<StreamCommand>,
    event_tx: mpsc::Sender<AgentStreamEvent>,
) {
    let (mut write, mut read) = ws.split();
    let mut pending: HashMap<u64, oneshot::Sender<Result<Frame, ControlError>>> = HashMap::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(StreamCommand { frame, reply }) = cmd else { break };
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                        continue;
                    }
                };
                let id = frame.id.unwrap_or_default();
                if write.send(Message::Text(text.into())).await.is_err() {
                    let _ = reply.send(Err(ControlError::StreamNotConnected));
                    break;
                }
                pending.insert(id, reply);
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_frame(text.as_str(), &mut pending, &event_tx).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("agent stream closed by daemon");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "agent stream websocket error");
                        break;
                    }
                    _ => {} // Ping/Pong/Binary — ignore
                }
            }
        }
    }

    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(ControlError::StreamNotConnected));
    }
}

async fn dispatch_frame(
    text: &str,
    pending: &mut HashMap<u64, oneshot::Sender<Result<Frame, ControlError>>>,
    event_tx: &mpsc::Sender<AgentStreamEvent>,
) {
    let frame = match Frame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "agent stream: dropping malformed frame");
            return;
        }
    };
    match frame.kind {
        FrameKind::Response | FrameKind::Error => {
            let Some(id) = frame.id else {
                tracing::warn!("agent stream: response frame without id");
                return;
            };
            match pending.remove(&id) {
                Some(reply) => {
                    let _ = reply.send(Ok(frame));
                }
                None => tracing::warn!(id, "agent stream: response for unknown request"),
            }
        }
        FrameKind::Event => {
            match serde_json::from_value::<AgentStreamEvent>(frame.data) {
                Ok(event) => {
                    let _ = event_tx.send(event).await;
                }
                Err(e) => tracing::warn!(error = %e, "agent stream: unparseable event"),
            }
        }
        FrameKind::Request => {
            tracing::warn!("agent stream: unexpected request frame from daemon");
        }
    }
}

/// Read-only event stream (permissions, workspace).
pub struct EventStream<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> EventStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Wrap a connected WebSocket, spawning a read task.
    pub(crate) fn connect(ws: WebSocketStream<TcpStream>) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let (_, mut read) = ws.split();
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<T>(text.as_str()) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "event stream: unparseable event");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "event stream: websocket error");
                        break;
                    }
                    _ => {}
                }
            }
        });
        Self { rx }
    }

    /// In-process stream fed by the returned sender.
    pub fn channel() -> (mpsc::Sender<T>, Self) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (tx, Self { rx })
    }

    /// Next event; `None` once the stream has closed.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
