//! Message routing
//!
//! Validates frame shape, answers pings inline, dispatches to the
//! registered handlers and turns handler failures into redacted `error`
//! messages. No inbound frame ever closes the session.

use std::sync::Arc;

use serde_json::{json, Map};

use crate::connection::{ConnectionRegistry, Session};
use crate::handlers::MessageHandlers;
use crate::messages::{parse_frame, MessageType};

pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    handlers: Arc<MessageHandlers>,
}

impl MessageRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, handlers: Arc<MessageHandlers>) -> Self {
        Self { registry, handlers }
    }

    /// Route one inbound text frame.
    pub async fn route_message(&self, session: &Arc<Session>, raw: &str) {
        let (msg_type, payload) = match parse_frame(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(remote = %session.remote, "Invalid frame: {}", e.message());
                self.send_error(session, e.message()).await;
                return;
            }
        };

        // Keepalive, handled before any routing.
        if msg_type == MessageType::Ping.as_str() {
            self.registry
                .send(session, MessageType::Pong, Map::new(), None)
                .await;
            return;
        }

        let outcome = match msg_type.as_str() {
            "health" => self.handlers.handle_health(session).await,
            "analyze" => self.handlers.handle_analyze(session, &payload).await,
            "transcribe" => self.handlers.handle_transcribe(session, &payload).await,
            other => {
                self.send_error(session, &format!("Unknown message type: {other}"))
                    .await;
                return;
            }
        };

        if let Err(e) = outcome {
            // Details stay in the log; the client gets a redacted string.
            tracing::error!(remote = %session.remote, error = %e, "Handler failed");
            self.send_error(session, "Internal error").await;
        }
    }

    async fn send_error(&self, session: &Arc<Session>, message: &str) {
        let mut payload = Map::new();
        payload.insert("message".to_string(), json!(message));
        self.registry
            .send(session, MessageType::Error, payload, None)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipsight_config::{ExternalHostConfig, Settings};
    use clipsight_pipeline::{AnalysisService, TranscriptionService};
    use clipsight_plugins::PluginSet;
    use crate::messages::RequestParser;
    use crate::state::ServiceState;
    use futures::channel::mpsc::UnboundedReceiver;
    use futures::{SinkExt as _, StreamExt};
    use serde_json::Value;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};

    fn router() -> (MessageRouter, Arc<ConnectionRegistry>) {
        let settings = Settings::default();
        let registry = Arc::new(ConnectionRegistry::new());
        let state = Arc::new(ServiceState::new(2, 2));
        let handlers = Arc::new(MessageHandlers::new(
            registry.clone(),
            state,
            Arc::new(AnalysisService::new(
                &settings,
                PluginSet::new(Vec::new(), Default::default()),
            )),
            Arc::new(TranscriptionService::new(&settings)),
            RequestParser::new(ExternalHostConfig::default()),
            false,
        ));
        (MessageRouter::new(registry.clone(), handlers), registry)
    }

    fn capture_session(
        registry: &ConnectionRegistry,
    ) -> (Arc<Session>, UnboundedReceiver<Message>) {
        let (tx, rx) = futures::channel::mpsc::unbounded();
        let sink = tx.sink_map_err(|_| WsError::ConnectionClosed);
        let session = Arc::new(Session::new("test-client", sink));
        registry.register(&session);
        (session, rx)
    }

    async fn next_frame(rx: &mut UnboundedReceiver<Message>) -> Value {
        let msg = rx.next().await.unwrap();
        serde_json::from_str(&msg.into_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_ping_answers_pong() {
        let (router, registry) = router();
        let (session, mut rx) = capture_session(&registry);

        router
            .route_message(&session, r#"{"type":"ping","payload":{}}"#)
            .await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["type"], "pong");
        assert_eq!(frame["payload"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_unknown_type_reports_error_without_closing() {
        let (router, registry) = router();
        let (session, mut rx) = capture_session(&registry);

        router
            .route_message(&session, r#"{"type":"mystery","payload":{}}"#)
            .await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["type"], "error");
        assert_eq!(
            frame["payload"]["message"],
            "Unknown message type: mystery"
        );
        assert!(registry.is_connected(&session));
    }

    #[tokio::test]
    async fn test_malformed_json_reports_error() {
        let (router, registry) = router();
        let (session, mut rx) = capture_session(&registry);

        router.route_message(&session, "{{{{").await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["payload"]["message"], "Invalid JSON format");
    }

    #[tokio::test]
    async fn test_non_string_type_and_non_object_payload() {
        let (router, registry) = router();
        let (session, mut rx) = capture_session(&registry);

        router
            .route_message(&session, r#"{"type":1,"payload":{}}"#)
            .await;
        assert_eq!(
            next_frame(&mut rx).await["payload"]["message"],
            "Message type must be a string"
        );

        router
            .route_message(&session, r#"{"type":"health","payload":[]}"#)
            .await;
        assert_eq!(
            next_frame(&mut rx).await["payload"]["message"],
            "Payload must be an object"
        );
    }

    #[tokio::test]
    async fn test_health_routes_to_handler() {
        let (router, registry) = router();
        let (session, mut rx) = capture_session(&registry);

        router
            .route_message(&session, r#"{"type":"health","payload":{}}"#)
            .await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["type"], "status");
    }
}
