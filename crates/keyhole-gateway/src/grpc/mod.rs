//! gRPC mirror of the HTTP API, served next to it over the same store.

mod error;
mod server;

pub use error::GrpcError;
pub use server::ShortenerGrpcServer;
