//! HTTP API for the Tianji consultation service.
//!
//! Phone-verification login, entitlement-gated SSE chat relay, profile
//! and conversation management, an admin panel, and a stub-grade payment
//! flow with an order ledger and idempotent callbacks.

pub mod config;
pub mod error;
pub mod payment;
pub mod routes;
pub mod session;
pub mod sms;
pub mod state;

pub use config::Config;
pub use error::ApiError;
pub use state::AppState;
