//! Error types raised inside the engine.
//!
//! None of these cross the case executor boundary: they are folded
//! into an `error` result whose message is the `Display` text below.

use thiserror::Error;

/// Reasons a case could not produce a response to validate.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("Failed to encode request body: {0}")]
    Encode(String),
    #[error("HTTP request timed out after {timeout:?}: {source}")]
    Timeout {
        timeout: std::time::Duration,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP request error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Failed to read response body: {0}")]
    ReadBody(#[source] reqwest::Error),
}

/// Reasons a wire-format validation rule cannot be evaluated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleDecodeError {
    #[error("validation rule must be an object, got {0}")]
    NotAnObject(String),
    #[error("no supported comparator among keys [{0}]")]
    UnknownComparator(String),
    #[error("'{comparator}' expects [path, expected], got {payload}")]
    MalformedPayload {
        comparator: &'static str,
        payload: String,
    },
}
