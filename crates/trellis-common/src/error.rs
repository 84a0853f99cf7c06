//! Error types for Trellis
//!
//! Expected outcomes (CAS conflicts, missing rows) are never errors: they are
//! returned as `false` or as empty values. `TrellisError` covers the failures
//! that callers may want to tell apart after they were wrapped in
//! `anyhow::Error`.

/// Application-specific error types
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TrellisError {
    #[error("invalid silo address '{0}'")]
    InvalidSiloAddress(String),

    #[error("unknown silo status code {0}")]
    UnknownSiloStatus(i32),

    #[error("type coercion error: {0}")]
    Coercion(String),

    #[error("storage session is closed")]
    SessionClosed,

    #[error("schema object '{0}' does not exist")]
    SchemaMissing(String),

    #[error("invalid schema asset '{0}': {1}")]
    InvalidSchema(String, String),

    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl TrellisError {
    /// Check whether an `anyhow` error wraps a type coercion failure
    pub fn is_coercion(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<TrellisError>(),
            Some(TrellisError::Coercion(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trellis_error_display() {
        let err = TrellisError::InvalidSiloAddress("nope".to_string());
        assert_eq!(err.to_string(), "invalid silo address 'nope'");

        let err = TrellisError::UnknownSiloStatus(42);
        assert_eq!(err.to_string(), "unknown silo status code 42");

        let err = TrellisError::NotInitialized("reminder directory");
        assert_eq!(err.to_string(), "reminder directory is not initialized");
    }

    #[test]
    fn test_is_coercion() {
        let err: anyhow::Error = TrellisError::Coercion("bad json".to_string()).into();
        assert!(TrellisError::is_coercion(&err));

        let err: anyhow::Error = TrellisError::SessionClosed.into();
        assert!(!TrellisError::is_coercion(&err));

        let err = anyhow::anyhow!("plain failure");
        assert!(!TrellisError::is_coercion(&err));
    }
}
