use thiserror::Error;

/// Rejected caller input, raised before any network activity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("empty url")]
    Empty,
    #[error("invalid url {input}: {reason}")]
    InvalidUrl { input: String, reason: String },
    #[error("unsupported url scheme {0}")]
    UnsupportedScheme(String),
}
