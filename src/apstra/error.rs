use thiserror::Error;

/// Errors returned by the Apstra API client.
///
/// SECURITY: Error messages must NEVER contain the password or API token.
#[derive(Debug, Error)]
pub enum ApstraError {
    /// Login rejected or session expired
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// API returned an error response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("not found: {path}")]
    NotFound { path: String },

    /// Network-level error (connection failed, TLS, timeout, etc.)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("failed to parse response: {message}")]
    Parse { message: String },

    #[error("failed to lock blueprint {blueprint_id}: {message}")]
    Lock {
        blueprint_id: String,
        message: String,
    },

    #[error("blueprint {blueprint_id} still deploying after {seconds}s")]
    DeployTimeout { blueprint_id: String, seconds: u64 },

    #[error("invalid API token: {message}")]
    InvalidToken { message: String },

    /// Rejected connectivity template assignment. `detail` is the `errors`
    /// object of the response body.
    #[error("connectivity template assignment failed: {detail}")]
    CtAssignmentFailed { detail: serde_json::Value },
}

impl ApstraError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApstraError::NotFound { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApstraError::Api { status, .. } => Some(*status),
            ApstraError::NotFound { .. } => Some(404),
            ApstraError::CtAssignmentFailed { .. } => Some(422),
            _ => None,
        }
    }
}

impl From<ApstraError> for crate::error::ProviderError {
    fn from(err: ApstraError) -> Self {
        crate::error::ProviderError::Apstra(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_error_display() {
        let err = ApstraError::Api {
            status: 409,
            message: "label already exists".to_string(),
        };
        assert_eq!(err.to_string(), "API error (409): label already exists");
        assert_eq!(err.status(), Some(409));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found() {
        let err = ApstraError::NotFound {
            path: "/api/blueprints/abc".to_string(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found: /api/blueprints/abc");
    }

    #[test]
    fn test_lock_error_display() {
        let err = ApstraError::Lock {
            blueprint_id: "bp1".to_string(),
            message: "timed out after 600s".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to lock blueprint bp1: timed out after 600s"
        );
    }

    #[test]
    fn test_ct_assignment_failed_carries_detail() {
        let err = ApstraError::CtAssignmentFailed {
            detail: json!({"invalid_application_point_ids": ["ap1"]}),
        };
        assert!(err.to_string().contains("ap1"));
    }

    #[test]
    fn test_conversion_to_provider_error() {
        let err = ApstraError::Auth {
            message: "bad credentials".to_string(),
        };
        let provider_err: crate::error::ProviderError = err.into();
        assert!(matches!(
            provider_err,
            crate::error::ProviderError::Apstra(_)
        ));
        assert!(provider_err.to_string().contains("authentication failed"));
    }
}
