//! REST API client module for the biolearn backend.
//!
//! Every backend response is wrapped in a `GenericResponseV2` envelope
//! (`{status, message, _embedded}`); this module unwraps it and maps
//! failures onto `ApiError`.
//!
//! Authenticated calls carry the session's bearer token.

pub mod client;
pub mod envelope;
pub mod error;

pub use client::ApiClient;
pub use envelope::{GenericResponseV2, ResponseStatus};
pub use error::ApiError;
