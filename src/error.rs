//! Error types shared by the transport and the resource adapters

use thiserror::Error;

/// HTTP status the control plane uses for "resource busy, retry later"
pub const HTTP_CONFLICT: u16 = 409;

/// HTTP status for a missing resource
pub const HTTP_NOT_FOUND: u16 = 404;

/// Errors raised while talking to the control plane or interpreting its replies
#[derive(Error, Debug)]
pub enum CloudError {
    /// A payload was present but a field had an unexpected shape
    #[error("Malformed {kind} response: {reason}")]
    MalformedResponse { kind: &'static str, reason: String },

    #[error("No such {kind}: {id}")]
    ResourceNotFound { kind: &'static str, id: String },

    #[error("Operation not supported: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Communication error: {0}")]
    Communication(String),

    /// Non-success HTTP status reported by the provider
    #[error("API request failed ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CloudError {
    pub fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            kind,
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::ResourceNotFound { kind, id: id.into() }
    }

    /// HTTP status carried by the error, if it came from the provider
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Provider-reported "resource busy" condition
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(HTTP_CONFLICT)
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(HTTP_NOT_FOUND)
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        Self::Communication(err.to_string())
    }
}

impl From<serde_json::Error> for CloudError {
    fn from(err: serde_json::Error) -> Self {
        Self::Communication(format!("Failed to parse response JSON: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

/// Format an error for display on the command line.
/// Maps common HTTP statuses to actionable messages and truncates the rest.
pub fn format_cloud_error(error: &CloudError) -> String {
    match error.status() {
        Some(401) => return "Authentication failed. Check NOVA_AUTH_TOKEN or the configured token.".to_string(),
        Some(403) => return "Permission denied for this tenant.".to_string(),
        Some(HTTP_NOT_FOUND) => return "Resource not found.".to_string(),
        Some(HTTP_CONFLICT) => return "Resource conflict. The resource is busy; try again later.".to_string(),
        Some(413) | Some(429) => return "Rate limit or quota exceeded. Please try again later.".to_string(),
        Some(500) | Some(503) => return "Control plane temporarily unavailable. Please try again.".to_string(),
        _ => {}
    }

    let error_str = error.to_string();
    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(120)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_and_not_found_classification() {
        let conflict = CloudError::Api {
            status: 409,
            message: "Image is in use".to_string(),
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_not_found());

        let missing = CloudError::Api {
            status: 404,
            message: "not found".to_string(),
        };
        assert!(missing.is_not_found());
        assert!(!missing.is_conflict());

        assert!(!CloudError::Communication("timeout".into()).is_conflict());
    }

    #[test]
    fn test_format_cloud_error_maps_statuses() {
        let err = CloudError::Api {
            status: 409,
            message: "busy".to_string(),
        };
        assert!(format_cloud_error(&err).contains("conflict"));

        let err = CloudError::InvalidState("address 7 is not attached".to_string());
        assert_eq!(format_cloud_error(&err), "Invalid state: address 7 is not attached");
    }
}
