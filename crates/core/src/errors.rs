use std::path::PathBuf;

use thiserror::Error;

// None of these surface through the per-ack hooks; the engine degrades instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("flow table at capacity ({capacity} flows)")]
    AtCapacity { capacity: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("trace i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed trace event on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}
