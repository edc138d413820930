// Core domain
pub mod event;
pub mod queue;
pub mod ratelimit;
pub mod router;
pub mod session;

// Application layer
pub mod api;
pub mod server;
pub mod upstream;
pub mod websocket;

// Supporting modules
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod stats;
pub mod tasks;
