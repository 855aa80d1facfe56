//! Crate-wide error type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to (de)serialize object: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{field} is not valid base64: {source}")]
    InvalidBase64 {
        field: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("vcs {name:?} not found in namespace {namespace:?}")]
    VcsNotFound { namespace: String, name: String },

    #[error("unsupported toolchain: {0}")]
    UnsupportedToolchain(String),

    #[error("unsupported entrypoint extension: {0}")]
    UnsupportedEntrypointExtension(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
