//! Bidirectional framed JSON-RPC v1 engine.
//!
//! [`engine::Engine`] multiplexes requests, responses, and notifications in
//! both directions over one async byte transport. [`message`] is the wire
//! codec it reads and writes; [`id`] is the outbound request ID generator.
//! Application code talks to a running engine only through [`EngineHandle`].

mod engine;
mod id;
mod message;

pub use engine::{Engine, EngineError, EngineHandle, Notification, Request, ResponseSink, RpcResponse};
pub use message::{decode_frame, encode_frame, Frame, ResponseOutcome};
pub use tokio_util::sync::CancellationToken;
