//! Error taxonomy for the reconstruction engine.
//!
//! The first four variants are always recovered where they happen and end up
//! as `warnings` on the response. None of them aborts a call.

use thiserror::Error;

use crate::fragment::FragmentSource;

#[derive(Error, Debug)]
pub enum ResonanceError {
    #[error("source {source_name} unavailable: {reason}")]
    SourceUnavailable {
        source_name: FragmentSource,
        reason: String,
    },

    #[error("source {source_name} timed out after {timeout_ms}ms")]
    SourceTimeout {
        source_name: FragmentSource,
        timeout_ms: u64,
    },

    #[error("source {source_name} returned malformed data: {reason}")]
    MalformedResponse {
        source_name: FragmentSource,
        reason: String,
    },

    #[error("basin registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ResonanceError {
    /// Classify a backend failure: decode errors count as malformed data,
    /// everything else as an unavailable source.
    pub fn from_source_failure(source_name: FragmentSource, err: &anyhow::Error) -> Self {
        let malformed = err
            .chain()
            .any(|cause| cause.downcast_ref::<serde_json::Error>().is_some());
        if malformed {
            ResonanceError::MalformedResponse {
                source_name,
                reason: format!("{:#}", err),
            }
        } else {
            ResonanceError::SourceUnavailable {
                source_name,
                reason: format!("{:#}", err),
            }
        }
    }

    /// Whether this error is one the engine recovers from locally.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ResonanceError::SourceUnavailable { .. }
                | ResonanceError::SourceTimeout { .. }
                | ResonanceError::MalformedResponse { .. }
                | ResonanceError::RegistryUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ResonanceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_decode_failure_is_malformed() {
        let decode: std::result::Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let err = decode.context("reading sessions").unwrap_err();
        let classified = ResonanceError::from_source_failure(FragmentSource::Session, &err);
        assert!(matches!(classified, ResonanceError::MalformedResponse { .. }));
        assert!(classified.to_string().starts_with("source session returned malformed data"));
    }

    #[test]
    fn test_other_failure_is_unavailable() {
        let err = anyhow::anyhow!("connection refused");
        let classified = ResonanceError::from_source_failure(FragmentSource::Entity, &err);
        assert!(matches!(classified, ResonanceError::SourceUnavailable { .. }));
        assert_eq!(classified.to_string(), "source entity unavailable: connection refused");
    }

    #[test]
    fn test_recoverable_kinds() {
        let timeout = ResonanceError::SourceTimeout {
            source_name: FragmentSource::Episodic,
            timeout_ms: 50,
        };
        assert!(timeout.is_recoverable());
        assert_eq!(timeout.to_string(), "source episodic timed out after 50ms");
        assert!(!ResonanceError::Config("bad".into()).is_recoverable());
    }
}
