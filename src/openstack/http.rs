//! HTTP utilities for OpenStack REST API calls

use crate::error::{CloudError, Result};
use reqwest::header::LOCATION;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;

/// Header carrying the Keystone token
const AUTH_HEADER: &str = "X-Auth-Token";

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut cut = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Pull the human-readable message out of a provider fault payload.
///
/// Nova and Cinder wrap faults in an object keyed by the fault name, e.g.
/// `{"itemNotFound": {"message": "...", "code": 404}}`; newer services use
/// `{"error": {"message": "..."}}`.
pub fn extract_error_message(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for fault in map.values() {
            if let Some(message) = fault.get("message").and_then(|m| m.as_str()) {
                return message.to_string();
            }
        }
        if let Some(message) = map.get("message").and_then(|m| m.as_str()) {
            return message.to_string();
        }
    }
    sanitize_for_log(body)
}

/// HTTP client wrapper for OpenStack API calls
#[derive(Clone)]
pub struct NovaHttpClient {
    client: Client,
}

impl NovaHttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("novaconverge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CloudError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Make a GET request; an empty body yields `None`
    pub async fn get(&self, url: &str, token: &str) -> Result<Option<Value>> {
        tracing::debug!("GET {}", url);
        let request = self.client.get(url).header(AUTH_HEADER, token);
        let response = send(request).await?;
        read_json(response).await
    }

    /// Make a POST request with a JSON body
    pub async fn post(&self, url: &str, token: &str, body: &Value) -> Result<Option<Value>> {
        tracing::debug!("POST {}", url);
        let request = self.client.post(url).header(AUTH_HEADER, token).json(body);
        let response = send(request).await?;

        // createImage answers 202 with an empty body and the new image in Location
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        match read_json(response).await? {
            Some(value) => Ok(Some(value)),
            None => Ok(location.map(|loc| serde_json::json!({ "location": loc }))),
        }
    }

    /// Make a DELETE request
    pub async fn delete(&self, url: &str, token: &str) -> Result<()> {
        tracing::debug!("DELETE {}", url);
        let request = self.client.delete(url).header(AUTH_HEADER, token);
        send(request).await?;
        Ok(())
    }
}

async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| CloudError::Communication(format!("Failed to send request: {}", e)))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    // 404 and 409 are routine for polling and conflict retries
    if status.as_u16() == 404 || status.as_u16() == 409 {
        tracing::debug!("API returned {} - {}", status, sanitize_for_log(&body));
    } else {
        tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
    }

    Err(CloudError::Api {
        status: status.as_u16(),
        message: extract_error_message(&body),
    })
}

async fn read_json(response: Response) -> Result<Option<Value>> {
    let body = response
        .text()
        .await
        .map_err(|e| CloudError::Communication(format!("Failed to read response body: {}", e)))?;

    if body.trim().is_empty() {
        return Ok(None);
    }

    Ok(Some(serde_json::from_str(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_error_message_from_nova_fault() {
        let body = r#"{"conflictingRequest": {"message": "Image 42 is in use", "code": 409}}"#;
        assert_eq!(extract_error_message(body), "Image 42 is in use");
    }

    #[test]
    fn test_extract_error_message_from_plain_text() {
        assert_eq!(extract_error_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_sanitize_for_log_truncates() {
        let long = "x".repeat(500);
        let sanitized = sanitize_for_log(&long);
        assert!(sanitized.contains("[truncated, 500 bytes total]"));
    }
}
