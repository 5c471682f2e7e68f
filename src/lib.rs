// Shared infrastructure
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Core hub and delivery
pub mod dispatch;
pub mod hub;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Background work
pub mod tasks;
