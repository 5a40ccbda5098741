//! HTTP transport: request/response RPC plus Server-Sent Events push.

pub mod server;

pub use server::{
    AuthConfig, CorsConfig, HttpServerIdentity, HttpTransport, HttpTransportConfig,
};
