//! GophKeeper server.
//!
//! Stores per-user lists of sealed record versions and never sees a key or
//! a plaintext. Agents authenticate with HS256 bearer tokens; agents that
//! have not pulled within the sync period may not write.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod jwt;
pub mod server;
pub mod storage;

pub use config::{ConfigOverrides, ServerConfig};
pub use error::ServerError;
pub use server::{build_router, AppState};
pub use storage::ServerStorage;
