//! Connection registry
//!
//! Tracks live sessions and provides the send primitive every other
//! component uses. Writes to a session are serialized by the session's own
//! writer lock; the registry lock only guards the session map and is never
//! held across a send. Sends to closed or unregistered sessions are silently
//! absorbed and report `false`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{Sink, SinkExt};
use parking_lot::Mutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::messages::{encode_message, MessageType};

type BoxedSink = Box<dyn Sink<Message, Error = WsError> + Send + Unpin>;

/// One accepted client connection.
pub struct Session {
    pub id: String,
    pub remote: String,
    open: AtomicBool,
    writer: tokio::sync::Mutex<BoxedSink>,
}

impl Session {
    pub fn new(
        remote: impl Into<String>,
        sink: impl Sink<Message, Error = WsError> + Send + Unpin + 'static,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            remote: remote.into(),
            open: AtomicBool::new(true),
            writer: tokio::sync::Mutex::new(Box::new(sink)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Mark the session closed. No further writes are attempted after this.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Write a raw frame, bypassing the envelope. Used for keepalive pings
    /// and the close handshake.
    pub async fn send_raw(&self, message: Message) -> bool {
        if !self.is_open() {
            return false;
        }
        let mut writer = self.writer.lock().await;
        writer.send(message).await.is_ok()
    }

    /// Send the close frame. Callers bound this with the close timeout.
    pub async fn close_handshake(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.send(Message::Close(None)).await;
    }
}

/// The set of live sessions.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. Idempotent for the same session object.
    pub fn register(&self, session: &Arc<Session>) {
        let mut sessions = self.sessions.lock();
        sessions.insert(session.id.clone(), session.clone());
        tracing::info!(
            remote = %session.remote,
            total = sessions.len(),
            "Client connected"
        );
    }

    /// Remove a session. Idempotent.
    pub fn unregister(&self, session: &Session) {
        let mut sessions = self.sessions.lock();
        sessions.remove(&session.id);
        tracing::info!(
            remote = %session.remote,
            total = sessions.len(),
            "Client disconnected"
        );
    }

    pub fn is_connected(&self, session: &Session) -> bool {
        session.is_open() && self.sessions.lock().contains_key(&session.id)
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Send an enveloped message to one session.
    ///
    /// Returns `false` without raising when the session is unregistered,
    /// closed, or the transport write fails. The registry lock is released
    /// before the write; concurrent sends to different sessions proceed in
    /// parallel while sends to the same session serialize on its writer.
    pub async fn send(
        &self,
        session: &Arc<Session>,
        kind: MessageType,
        payload: serde_json::Map<String, serde_json::Value>,
        job_id: Option<&str>,
    ) -> bool {
        if !self.is_connected(session) {
            tracing::debug!(kind = kind.as_str(), "Cannot send: connection inactive");
            return false;
        }

        let frame = encode_message(kind, payload, job_id);
        let mut writer = session.writer.lock().await;
        match writer.send(Message::Text(frame)).await {
            Ok(()) => true,
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                tracing::debug!(kind = kind.as_str(), "Connection closed while sending");
                false
            }
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), error = %e, "Send failed");
                false
            }
        }
    }
}
