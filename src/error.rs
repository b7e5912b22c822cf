use thiserror::Error;

use crate::apstra::ApstraError;
use crate::framework::Diagnostics;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown resource type: {0}")]
    UnknownResource(String),

    #[error("unknown data source type: {0}")]
    UnknownDataSource(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Apstra(ApstraError),

    #[error("{0}")]
    Diagnostics(Diagnostics),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_unknown_resource_display() {
        let err = ProviderError::UnknownResource("apstra_bogus".to_string());
        assert_eq!(err.to_string(), "unknown resource type: apstra_bogus");
    }

    #[test]
    fn test_config_error_display() {
        let err = ProviderError::Config("missing url".to_string());
        assert_eq!(err.to_string(), "configuration error: missing url");
    }

    #[test]
    fn test_io_error_from_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: ProviderError = io_err.into();
        assert!(matches!(err, ProviderError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_diagnostics_display() {
        let mut diags = Diagnostics::new();
        diags.add_error("boom", "detail");
        let err = ProviderError::Diagnostics(diags);
        assert_eq!(err.to_string(), "Error: boom: detail");
    }
}
