//! WebSocket job server
//!
//! Accepts framed analysis and transcription requests over TCP or a Unix
//! domain socket, enforces per-kind concurrency caps, runs jobs on blocking
//! workers and streams progress back to the requesting session.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod metrics;
pub mod router;
pub mod server;
pub mod state;

pub use connection::{ConnectionRegistry, Session};
pub use handlers::MessageHandlers;
pub use messages::{MessageType, RequestParser};
pub use router::MessageRouter;
pub use server::WebSocketServer;
pub use state::{AdmissionError, JobGuard, ServiceState, ServiceStatus};

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
