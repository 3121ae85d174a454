//! Typed failures for each stage of the pipeline.
//!
//! Stage-level code returns these; `main` wraps them in `anyhow` with context.

use std::path::PathBuf;
use thiserror::Error;

/// Why a fetch did not produce a body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    #[error("HTTP status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Transport(String),

    #[error("redirect loop: gave up after {0} hops")]
    RedirectLoop(usize),

    #[error("invalid redirect target: {0}")]
    BadRedirect(String),
}

impl FetchFailure {
    /// HTTP status code, when the failure came from one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchFailure::Status(code) => Some(*code),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no chart container (div.chart) on results page")]
    MissingContainer,

    #[error("chart container has no data-stats attribute")]
    MissingAttribute,

    #[error("data-stats is not a valid statistics payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("listing '{title}' has invalid amount {amount}")]
    InvalidAmount { title: String, amount: f64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("no listing essentials on detail page")]
    MissingEssentials,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to write cache entry {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("listing '{title}' is in the {group} group but its subtitle '{subtitle}' says otherwise")]
    SoldFlagMismatch {
        title: String,
        subtitle: String,
        group: &'static str,
    },
}
