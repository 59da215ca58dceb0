//! Core library for the biolearn e-learning client.
//!
//! This crate owns everything the front ends share:
//!
//! - `api`: REST client for the authentication endpoints and the
//!   `GenericResponseV2` envelope every response is wrapped in
//! - `auth`: durable credential storage, the published session, bearer
//!   token expiry checks, the background refresh loop and route guards
//! - `config`: user configuration and data directory resolution
//! - `models`: user records and request/response bodies

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthService, Session, SessionStore};
pub use config::Config;
