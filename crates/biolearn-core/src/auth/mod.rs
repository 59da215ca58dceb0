//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `KeyValueStore`, `FileStore`: durable plaintext storage for the token and user
//! - `token`: local decoding of bearer token claims for expiry checks
//! - `SessionStore`: the single published session, shared by reference
//! - `RefreshLoop`: background timer that silently renews expiring tokens
//! - `guard`: navigation predicates for authenticated and admin routes
//! - `AuthService`: login/logout/refresh flows tying the pieces together
//!
//! Tokens are checked locally with a 30 second safety buffer and refreshed
//! once they are within 5 minutes of expiry.

pub mod guard;
pub mod navigation;
pub mod refresh;
pub mod service;
pub mod session;
pub mod storage;
pub mod token;

pub use guard::{admin_guard, auth_guard, check_route, Gate, GuardOutcome, LOGIN_ROUTE};
pub use navigation::{Navigator, TracingNavigator};
pub use refresh::{LoopState, RefreshLoop, TickOutcome, TokenRefresher};
pub use service::AuthService;
pub use session::{Session, SessionStore};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
