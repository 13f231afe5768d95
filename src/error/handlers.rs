//! Standardized messages for HTTP and network failures

use reqwest::StatusCode;

/// Maps registry status codes to readable messages
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Describe a failed step of a blob upload session
    pub fn describe_upload_error(status: StatusCode, error_text: &str, context: &str) -> String {
        match status.as_u16() {
            400 => {
                if error_text.contains("DIGEST_INVALID") {
                    format!(
                        "Digest validation failed during {} - uploaded content does not match: {}",
                        context, error_text
                    )
                } else {
                    format!("Bad request during {}: {}", context, error_text)
                }
            }
            401 => format!("Authentication required for {}: {}", context, error_text),
            403 => format!("Permission denied for {}: {}", context, error_text),
            404 => format!(
                "Repository not found or {} session expired: {}",
                context, error_text
            ),
            413 => format!("Payload too large for {}: {}", context, error_text),
            416 => format!("Requested range not satisfiable during {}: {}", context, error_text),
            500 => format!("Registry server error during {}: {}", context, error_text),
            502 | 503 => format!("Registry unavailable during {}: {}", context, error_text),
            507 => format!("Registry out of storage during {}: {}", context, error_text),
            _ => format!("{} failed (status {}): {}", context, status, error_text),
        }
    }

    /// Describe a failed manifest, listing or delete call
    pub fn describe_registry_error(status: StatusCode, error_text: &str, operation: &str) -> String {
        match status.as_u16() {
            401 => format!("Unauthorized to perform {}: {}", operation, error_text),
            403 => format!("Forbidden: insufficient permissions for {}: {}", operation, error_text),
            404 => format!("Resource not found for {}: {}", operation, error_text),
            405 => format!(
                "Operation not allowed for {} (is deletion enabled on the registry?): {}",
                operation, error_text
            ),
            429 => format!("Rate limited during {}: {}", operation, error_text),
            500 => format!("Registry server error during {}: {}", operation, error_text),
            502 | 503 => format!("Registry unavailable for {}: {}", operation, error_text),
            _ => format!("{} failed (status {}): {}", operation, status, error_text),
        }
    }

    /// Read a response body for error reporting without failing on a bad body
    pub async fn error_body(response: reqwest::Response) -> String {
        response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string())
    }
}

/// Network error categorization
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    pub fn describe(error: &reqwest::Error, context: &str) -> String {
        if error.is_timeout() {
            format!("{} timed out: {}", context, error)
        } else if error.is_connect() {
            format!("Connection error during {}: {}", context, error)
        } else {
            format!("{} network error: {}", context, error)
        }
    }
}
