//! Replication with the GophKeeper server.
//!
//! - Bearer-authenticated HTTP client with single re-authentication on 401
//! - Register and login flows, including offline login
//! - The per-record state machine
//! - The periodic three-phase reconciler

pub mod auth;
pub mod client;
pub mod engine;
pub mod models;
pub mod state;

pub use auth::LoginMode;
pub use client::ApiClient;
pub use engine::{Reconciler, TickReport};
pub use models::{IdentityData, ReplaceMode, Reply};
pub use state::{next_status, PushOutcome, SyncEvent};
