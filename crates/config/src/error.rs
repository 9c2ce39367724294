//! Configuration error types.

use thiserror::Error;

/// Convenience alias for config results.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors from loading or interpreting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid TOML syntax or structure.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A store section is missing a required key.
    #[error("store section missing required key `{0}`")]
    MissingKey(&'static str),

    /// A key holds a value of the wrong shape (subtree where a string was
    /// expected, or vice versa).
    #[error("config key `{key}` has the wrong type: expected {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
    },
}
