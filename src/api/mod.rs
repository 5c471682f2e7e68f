//! API layer - HTTP endpoint handlers organized by domain.

mod connections;
mod health;
mod metrics;
mod publish;
mod routes;
mod topics;

pub use connections::disconnect_connection;
pub use health::{health, stats};
pub use metrics::prometheus_metrics;
pub use publish::{publish_to_topic, send_to_user};
pub use routes::api_routes;
pub use topics::{get_topic, get_user_connections, list_topics};
