//! Failure taxonomy for the collaborators the engine talks to.
//!
//! Only [`AuthError`] at startup is fatal. Every other error is scoped to a
//! single request and ends up in the response text.

use thiserror::Error;

/// Maximum number of body bytes kept for diagnostics.
pub(crate) const MAX_DIAGNOSTIC_BODY: usize = 512;

/// Login to the snapshot platform failed.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid platform url: {0}")]
    InvalidUrl(String),

    #[error("login request failed: {0}")]
    Transport(String),

    #[error("login rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// A snapshot could not be retrieved.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("invalid snapshot url: {0}")]
    InvalidUrl(String),

    #[error("snapshot request failed: {0}")]
    Transport(String),

    #[error("snapshot rejected ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("re-authentication failed: {0}")]
    Reauthentication(#[source] AuthError),

    #[error("failed to read snapshot body: {0}")]
    Body(#[from] std::io::Error),
}

/// The detection service did not return a usable answer.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("detection request failed: {0}")]
    Transport(String),

    #[error("detection service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed detection response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("detection unsuccessful: {0}")]
    Unsuccessful(String),
}

/// A fire-and-forget webhook call failed. Logged, never surfaced.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid webhook url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("webhook {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("webhook {url} returned {status}")]
    Status { url: String, status: u16 },
}

/// Lossy, truncated rendering of a response body for error messages.
pub(crate) fn diagnostic_body(bytes: &[u8]) -> String {
    let end = bytes.len().min(MAX_DIAGNOSTIC_BODY);
    let mut text = String::from_utf8_lossy(&bytes[..end]).into_owned();
    if bytes.len() > MAX_DIAGNOSTIC_BODY {
        text.push_str("...");
    }
    text
}
