//! Local inspection of bearer token claims.
//!
//! The payload segment is decoded without verifying the signature. This only
//! decides whether the client believes a token is usable; the backend still
//! enforces authorization. Every decode failure counts as expired.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// Safety margin subtracted from `exp` before declaring a token valid.
pub const EXPIRY_BUFFER_SECS: i64 = 30;

/// A token this close to expiry should be renewed.
pub const REFRESH_BUFFER_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    /// Expiry, seconds since the Unix epoch
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub sub: Option<String>,
}

/// Decode the middle segment of a three-part token.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let payload = parts[1].trim_end_matches('=');
    if payload.is_empty() {
        return None;
    }
    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&decoded).ok()
}

pub fn expires_at(token: &str) -> Option<DateTime<Utc>> {
    let exp = decode_claims(token)?.exp?;
    DateTime::from_timestamp(exp, 0)
}

/// Human-readable expiry, e.g. "expires 2026-10-17 14:05 UTC (in 42m)".
pub fn expiry_display(token: &str) -> String {
    expiry_display_at(token, Utc::now())
}

pub fn expiry_display_at(token: &str, now: DateTime<Utc>) -> String {
    let Some(expiry) = expires_at(token) else {
        return "unreadable (treated as expired)".to_string();
    };
    let stamp = expiry.format("%Y-%m-%d %H:%M UTC");
    let remaining = expiry - now;
    if remaining <= Duration::zero() {
        format!("expired {}", stamp)
    } else if remaining.num_minutes() < 1 {
        format!("expires {} (in {}s)", stamp, remaining.num_seconds())
    } else if remaining.num_minutes() < 60 {
        format!("expires {} (in {}m)", stamp, remaining.num_minutes())
    } else {
        format!("expires {} (in {}h)", stamp, remaining.num_hours())
    }
}

pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now())
}

pub fn is_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    match expires_at(token) {
        Some(expiry) => now >= expiry - Duration::seconds(EXPIRY_BUFFER_SECS),
        None => true,
    }
}

pub fn should_refresh(token: &str) -> bool {
    should_refresh_at(token, Utc::now())
}

/// Malformed tokens are never refreshable.
pub fn should_refresh_at(token: &str, now: DateTime<Utc>) -> bool {
    match expires_at(token) {
        Some(expiry) => now >= expiry - Duration::seconds(REFRESH_BUFFER_SECS),
        None => false,
    }
}
