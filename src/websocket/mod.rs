//! WebSocket transport: upgrade, per-connection reader/writer tasks and the
//! JSON frames exchanged with clients.

mod handler;
mod message;

pub use handler::{is_valid_topic, ws_handler, WsQuery};
pub use message::{ClientMessage, OutboundMessage, Payload, ServerMessage};
