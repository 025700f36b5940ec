//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the application.

pub mod error;
pub mod retry;

/// Mask a secret for display, keeping only its length visible
pub fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        String::from("<unset>")
    } else {
        format!("<{} chars>", secret.chars().count())
    }
}

/// Best-effort local hostname, falling back to "unknown"
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| String::from("unknown"))
}

/// Default user agent for this build
pub fn user_agent(role: &str) -> String {
    format!("seqharvest-{role}/{}", env!("CARGO_PKG_VERSION"))
}
