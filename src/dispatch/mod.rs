//! Fan-out of producer payloads to user and topic connection sets.

mod dispatcher;

pub use dispatcher::{DeliveryReport, Dispatcher, DispatcherStats, DispatcherStatsSnapshot};
