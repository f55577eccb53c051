//! Two small JSON services in front of the evaluation service: a sliding
//! window average over number streams (`numbers`) and a cached social-graph
//! aggregate (`social`).

pub mod admin;
pub mod cache;
pub mod config;
pub mod error;
pub mod ranking;
pub mod server;
pub mod services;
pub mod session;
pub mod telemetry;
pub mod upstream;
pub mod window;
