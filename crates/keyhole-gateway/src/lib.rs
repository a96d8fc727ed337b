//! HTTP and gRPC gateway for the Keyhole URL shortener.

pub mod app;
pub mod config;
pub mod error;
pub mod extract;
pub mod grpc;
pub mod handlers;
pub mod model;
pub mod state;
pub mod telemetry;

pub use app::App;
pub use state::AppState;
