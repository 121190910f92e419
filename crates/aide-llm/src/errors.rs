//! Provider error taxonomy.
//!
//! Classification decides recovery: only `RoutingUnavailable` is recovered
//! locally (by dropping the provider preference), everything else is terminal
//! for the current generation.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// The pinned upstream provider has no serving endpoint for the model.
    RoutingUnavailable,
    InvalidRequest,
    Auth,
    RateLimit,
    Server,
    Network,
    Cancelled,
    Other,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoutingUnavailable => "routing_unavailable",
            Self::InvalidRequest => "invalid_request",
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::Network => "network",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

const ROUTING_UNAVAILABLE_MARKERS: [&str; 4] = [
    "no endpoints found",
    "no allowed providers",
    "no available providers",
    "provider is not available",
];

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn routing_unavailable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RoutingUnavailable, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ProviderErrorKind::Cancelled, "cancelled")
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Other, message)
    }

    pub fn is_routing_unavailable(&self) -> bool {
        self.kind == ProviderErrorKind::RoutingUnavailable
    }

    /// Worth retrying against the same route.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Network | ProviderErrorKind::RateLimit | ProviderErrorKind::Server
        )
    }

    /// Classify an HTTP failure from the upstream gateway.
    pub fn from_status(status: u16, body: &str) -> Self {
        if Self::mentions_missing_route(body) {
            return Self::routing_unavailable(truncate_body(body));
        }
        let kind = match status {
            400 | 404 | 422 => ProviderErrorKind::InvalidRequest,
            401 | 402 | 403 => ProviderErrorKind::Auth,
            429 => ProviderErrorKind::RateLimit,
            500..=599 => ProviderErrorKind::Server,
            _ => ProviderErrorKind::Other,
        };
        Self::new(kind, format!("HTTP {status}: {}", truncate_body(body)))
    }

    /// Classify an error reported mid-stream, where only the message survives.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if Self::mentions_missing_route(&message) {
            Self::routing_unavailable(message)
        } else {
            Self::other(message)
        }
    }

    fn mentions_missing_route(text: &str) -> bool {
        let lowered = text.to_ascii_lowercase();
        ROUTING_UNAVAILABLE_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() || error.is_connect() {
            ProviderErrorKind::Network
        } else if error.is_decode() {
            ProviderErrorKind::InvalidRequest
        } else {
            ProviderErrorKind::Other
        };
        Self::new(kind, error.to_string())
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 400;
    if body.chars().count() <= MAX {
        return body.trim().to_string();
    }
    let mut truncated: String = body.chars().take(MAX).collect();
    truncated.push_str("...");
    truncated
}
