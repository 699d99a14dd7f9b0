//! Error types for the relay.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    /// The upstream provider answered with an error status.
    #[error("Upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Token counting error: {message}")]
    TokenCount { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    pub fn upstream(status: u16, msg: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: msg.into(),
        }
    }

    pub fn token_count(msg: impl Into<String>) -> Self {
        Self::TokenCount {
            message: msg.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// HTTP status to report to the client. Only upstream failures carry their
    /// own status; everything else is a 500.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Upstream { status, .. } if (400..600).contains(status) => *status,
            Self::Http(e) => e.status().map_or(500, |s| s.as_u16()),
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
