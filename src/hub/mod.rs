//! Connection hub: registry, topic index and connection lifecycle.
//!
//! The hub is built once at startup and shared by `Arc` with every connection
//! handler, producer and background task.

mod manager;
mod registry;
mod stats;
mod topics;
mod types;

pub use manager::RealtimeHub;
pub use registry::ConnectionRegistry;
pub use stats::{ConnectionInfo, HubStats, TopicInfo, UserConnectionsInfo};
pub use topics::TopicIndex;
pub use types::{
    close_code, Admission, CloseReason, Connection, ConnectionId, ConnectionLimits,
    ConnectionState, EnqueueError, HubError, HubOptions, OverflowPolicy,
};
