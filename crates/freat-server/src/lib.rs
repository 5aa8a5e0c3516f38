//! Freat Server
//!
//! The TCP front end of the Freat memory scanning service: configuration,
//! connection handling and message framing over the dispatcher from
//! `freat-core`.

pub mod config;
pub mod server;

pub use config::ServerConfig;
pub use server::Server;
