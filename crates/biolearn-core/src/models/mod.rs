//! Data models for biolearn entities.
//!
//! - `UserRecord`, `Role`, `SubscriptionStatus`: the signed-in user snapshot
//! - `AuthPayload`: token + user embedded in login and refresh responses
//! - Request bodies for the `/auth/*` endpoints

pub mod auth;
pub mod user;

pub use auth::{
    AuthPayload, ForgotPasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest,
};
pub use user::{Role, SubscriptionStatus, UserRecord};
