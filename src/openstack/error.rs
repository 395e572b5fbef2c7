//! Error types for the OpenStack backend.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by the OpenStack backend.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OpenStackError {
    /// Raised when the credentials are incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when a request cannot be sent or its response cannot be read.
    #[error("request to {url} failed: {message}")]
    Transport {
        /// Endpoint that was called.
        url: String,
        /// Error reported by the HTTP client.
        message: String,
    },
    /// Raised when Keystone rejects the credentials.
    #[error("authentication failed with status {status}: {body}")]
    Auth {
        /// HTTP status returned by Keystone.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Raised when Keystone accepts the credentials but returns no token.
    #[error("authentication response carried no X-Subject-Token header")]
    MissingToken,
    /// Raised when the service catalog lacks a usable endpoint.
    #[error("no public {service} endpoint in the service catalog{}", region_suffix(region.as_deref()))]
    EndpointNotFound {
        /// Service type that was searched for.
        service: String,
        /// Region filter in effect.
        region: Option<String>,
    },
    /// Raised when a service answers with a non-success status.
    #[error("{method} {url} returned {status}: {body}")]
    Api {
        /// HTTP method used.
        method: &'static str,
        /// Endpoint that was called.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body, verbatim.
        body: String,
    },
    /// Raised when the block-storage service does not know the volume.
    #[error("volume {volume_id} not found")]
    VolumeNotFound {
        /// Identifier that was looked up.
        volume_id: String,
    },
    /// Raised when a response body does not match the expected shape.
    #[error("unexpected response from {url}: {message}")]
    Decode {
        /// Endpoint that was called.
        url: String,
        /// Deserialisation error.
        message: String,
    },
}

fn region_suffix(region: Option<&str>) -> String {
    region.map_or_else(String::new, |name| format!(" for region {name}"))
}

impl From<ConfigError> for OpenStackError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
