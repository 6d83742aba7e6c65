use serde_json::json;

/// Error type shared by the request path, the completion client and the
/// stream producers.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Malformed upstream stream: {0}")]
    MalformedStream(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    RateLimit,
    BadGateway,
    ServerError,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 | 404 | 422 => ErrorCategory::InvalidRequest,
        401 | 403 => ErrorCategory::Authentication,
        429 => ErrorCategory::RateLimit,
        500..=599 => ErrorCategory::BadGateway,
        _ => ErrorCategory::ServerError,
    }
}

impl RelayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::Validation(_) => ErrorCategory::InvalidRequest,
            RelayError::Transport(_) | RelayError::MalformedStream(_) => ErrorCategory::BadGateway,
            RelayError::Config(_) | RelayError::Internal(_) => ErrorCategory::ServerError,
            RelayError::Upstream { status, .. } => category_from_upstream_status(*status),
        }
    }
}

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => http::StatusCode::UNAUTHORIZED,
        ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::BadGateway => http::StatusCode::BAD_GATEWAY,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_type_label(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request_error",
        ErrorCategory::Authentication => "authentication_error",
        ErrorCategory::RateLimit => "rate_limit_error",
        ErrorCategory::BadGateway => "upstream_error",
        ErrorCategory::ServerError => "server_error",
    }
}

/// Format a request-level error as (`status_code`, JSON body).
#[must_use]
pub fn format_error(err: &RelayError) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let body = json!({
        "error": {
            "message": err.to_string(),
            "type": error_type_label(cat),
        }
    });
    (http_status_for_category(cat), body)
}

impl axum::response::IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let (status, body) = format_error(&RelayError::Validation("unknown role".into()));
        assert_eq!(status, http::StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(body["error"]["message"], "Invalid request: unknown role");
    }

    #[test]
    fn upstream_status_is_categorized() {
        let err = RelayError::Upstream {
            status: 429,
            message: "slow down".into(),
        };
        assert_eq!(err.category(), ErrorCategory::RateLimit);
        assert_eq!(format_error(&err).0, http::StatusCode::TOO_MANY_REQUESTS);

        let err = RelayError::Upstream {
            status: 503,
            message: "overloaded".into(),
        };
        assert_eq!(format_error(&err).0, http::StatusCode::BAD_GATEWAY);
    }
}
