//! Retry policy for the fallback panel transport.
//!
//! # Design Decisions
//! - Connection errors are always retryable
//! - 429 and 5xx are retryable for idempotent methods only; a POST that
//!   reached the panel is never replayed
//! - Attempts are bounded; the last response or error is surfaced as-is

use reqwest::{Method, StatusCode};

/// Total attempts per fallback call (first try included).
pub const FALLBACK_ATTEMPTS: u32 = 3;
/// Base delay between fallback attempts.
pub const RETRY_BASE_DELAY_MS: u64 = 100;
/// Maximum delay between fallback attempts.
pub const RETRY_MAX_DELAY_MS: u64 = 2000;

/// True for methods the panel can safely see twice.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Determine whether a fallback attempt should be retried.
pub fn is_retryable(method: &Method, status: Option<StatusCode>, connection_error: bool) -> bool {
    if connection_error {
        return true;
    }
    if !is_idempotent(method) {
        return false;
    }
    match status {
        Some(status) => {
            status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
        }
        None => false,
    }
}
