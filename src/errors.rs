use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Main error type for the poolmate service
#[derive(Debug)]
pub enum PoolmateError {
    // HTTP and API errors
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    InternalServer(String),

    // Lifecycle errors
    RideNotFound(String),
    ActiveRideNotFound(String),
    DriverNotFound(String),
    RiderNotFound(String),
    InvalidStateTransition {
        ride_id: String,
        from: String,
        action: String,
    },
    InvalidState(String),
    NotAuthorized(String),
    InvalidGeometry(String),

    // Validation errors
    ValidationFailed(Vec<ValidationError>),
    MissingRequiredField(String),

    // Storage errors
    RedisConnection(String),
    RedisQuery(String),
    DependencyUnavailable(String),

    // Serialization errors
    JsonParsing(String),
    JsonSerialization(String),

    // Notification sink errors
    MailDelivery(String),
    NetworkTimeout,
    NetworkConnection(String),
    HttpClient(String),

    // Configuration and setup errors
    ConfigurationError(String),
    Io(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl fmt::Display for PoolmateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolmateError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            PoolmateError::NotFound(msg) => write!(f, "Not found: {}", msg),
            PoolmateError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            PoolmateError::InternalServer(msg) => write!(f, "Internal server error: {}", msg),

            PoolmateError::RideNotFound(id) => write!(f, "Ride request not found: {}", id),
            PoolmateError::ActiveRideNotFound(id) => write!(f, "Active ride not found: {}", id),
            PoolmateError::DriverNotFound(id) => write!(f, "Driver not found: {}", id),
            PoolmateError::RiderNotFound(id) => write!(f, "Rider not found: {}", id),
            PoolmateError::InvalidStateTransition { ride_id, from, action } => {
                write!(f, "Cannot {} ride request {} while it is {}", action, ride_id, from)
            }
            PoolmateError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            PoolmateError::NotAuthorized(msg) => write!(f, "Not authorized: {}", msg),
            PoolmateError::InvalidGeometry(msg) => write!(f, "Invalid geometry: {}", msg),

            PoolmateError::ValidationFailed(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            PoolmateError::MissingRequiredField(field) => write!(f, "Missing required field: {}", field),

            PoolmateError::RedisConnection(msg) => write!(f, "Redis connection error: {}", msg),
            PoolmateError::RedisQuery(msg) => write!(f, "Redis query error: {}", msg),
            PoolmateError::DependencyUnavailable(msg) => write!(f, "Dependency unavailable: {}", msg),

            PoolmateError::JsonParsing(msg) => write!(f, "JSON parsing error: {}", msg),
            PoolmateError::JsonSerialization(msg) => write!(f, "JSON serialization error: {}", msg),

            PoolmateError::MailDelivery(msg) => write!(f, "Mail delivery failed: {}", msg),
            PoolmateError::NetworkTimeout => write!(f, "Network request timed out"),
            PoolmateError::NetworkConnection(msg) => write!(f, "Network connection error: {}", msg),
            PoolmateError::HttpClient(msg) => write!(f, "HTTP client error: {}", msg),

            PoolmateError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            PoolmateError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for PoolmateError {}

impl IntoResponse for PoolmateError {
    fn into_response(self) -> Response {
        let (status, error_type, details) = match &self {
            PoolmateError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", None),
            PoolmateError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", None),
            PoolmateError::Conflict(_) => (StatusCode::CONFLICT, "conflict", None),

            PoolmateError::RideNotFound(_) => (StatusCode::NOT_FOUND, "ride_not_found", None),
            PoolmateError::ActiveRideNotFound(_) => (StatusCode::NOT_FOUND, "active_ride_not_found", None),
            PoolmateError::DriverNotFound(_) => (StatusCode::NOT_FOUND, "driver_not_found", None),
            PoolmateError::RiderNotFound(_) => (StatusCode::NOT_FOUND, "rider_not_found", None),
            PoolmateError::InvalidStateTransition { from, action, .. } => (
                StatusCode::BAD_REQUEST,
                "invalid_state_transition",
                Some(serde_json::json!({ "current_status": from, "action": action })),
            ),
            PoolmateError::InvalidState(_) => (StatusCode::BAD_REQUEST, "invalid_state", None),
            PoolmateError::NotAuthorized(_) => (StatusCode::FORBIDDEN, "not_authorized", None),
            PoolmateError::InvalidGeometry(_) => (StatusCode::BAD_REQUEST, "invalid_geometry", None),

            PoolmateError::ValidationFailed(errors) => {
                (StatusCode::BAD_REQUEST, "validation_failed", serde_json::to_value(errors).ok())
            }
            PoolmateError::MissingRequiredField(_) => (StatusCode::BAD_REQUEST, "missing_field", None),

            PoolmateError::RedisConnection(_)
            | PoolmateError::RedisQuery(_)
            | PoolmateError::DependencyUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "dependency_unavailable", None)
            }

            // All other errors are treated as internal server errors
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
            details,
        };

        (status, axum::Json(error_response)).into_response()
    }
}

// Convenience type alias for Results
pub type PoolmateResult<T> = Result<T, PoolmateError>;

impl From<redis::RedisError> for PoolmateError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::IoError => PoolmateError::RedisConnection(err.to_string()),
            redis::ErrorKind::AuthenticationFailed => {
                PoolmateError::RedisConnection("Authentication failed".to_string())
            }
            _ => PoolmateError::RedisQuery(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for PoolmateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PoolmateError::NetworkTimeout
        } else if err.is_connect() {
            PoolmateError::NetworkConnection(err.to_string())
        } else {
            PoolmateError::HttpClient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for PoolmateError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() {
            PoolmateError::JsonParsing(err.to_string())
        } else {
            PoolmateError::JsonSerialization(err.to_string())
        }
    }
}

impl From<std::io::Error> for PoolmateError {
    fn from(err: std::io::Error) -> Self {
        PoolmateError::Io(err.to_string())
    }
}

// Helper functions for creating common errors
impl PoolmateError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        PoolmateError::BadRequest(msg.into())
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        PoolmateError::NotFound(resource.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        PoolmateError::Conflict(msg.into())
    }

    pub fn not_authorized(msg: impl Into<String>) -> Self {
        PoolmateError::NotAuthorized(msg.into())
    }

    pub fn invalid_geometry(msg: impl Into<String>) -> Self {
        PoolmateError::InvalidGeometry(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        PoolmateError::InvalidState(msg.into())
    }

    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        PoolmateError::ValidationFailed(vec![ValidationError {
            field: field.into(),
            message: message.into(),
        }])
    }

    pub fn invalid_transition(
        ride_id: impl Into<String>,
        from: impl fmt::Display,
        action: impl fmt::Display,
    ) -> Self {
        PoolmateError::InvalidStateTransition {
            ride_id: ride_id.into(),
            from: from.to_string(),
            action: action.to_string(),
        }
    }

    /// Storage hiccups and optimistic-concurrency exhaustion are safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolmateError::RedisConnection(_)
                | PoolmateError::RedisQuery(_)
                | PoolmateError::DependencyUnavailable(_)
                | PoolmateError::Conflict(_)
                | PoolmateError::NetworkTimeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = PoolmateError::DriverNotFound("drv-250828-a1b2XyZ9".to_string());
        assert_eq!(error.to_string(), "Driver not found: drv-250828-a1b2XyZ9");

        let error = PoolmateError::invalid_transition("req-1", "completed", "accept");
        assert_eq!(error.to_string(), "Cannot accept ride request req-1 while it is completed");
    }

    #[test]
    fn test_validation_error() {
        let error = PoolmateError::validation_error("rating", "must be between 1 and 5");
        match error {
            PoolmateError::ValidationFailed(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "rating");
                assert_eq!(errors[0].message, "must be between 1 and 5");
            }
            _ => panic!("Expected ValidationFailed error"),
        }
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (PoolmateError::RideNotFound("x".into()), StatusCode::NOT_FOUND),
            (PoolmateError::invalid_transition("x", "accepted", "reject"), StatusCode::BAD_REQUEST),
            (PoolmateError::not_authorized("wrong driver"), StatusCode::FORBIDDEN),
            (PoolmateError::invalid_geometry("lat out of range"), StatusCode::BAD_REQUEST),
            (PoolmateError::invalid_state("ride is pending"), StatusCode::BAD_REQUEST),
            (PoolmateError::conflict("busy"), StatusCode::CONFLICT),
            (PoolmateError::DependencyUnavailable("redis".into()), StatusCode::SERVICE_UNAVAILABLE),
            (PoolmateError::MailDelivery("smtp".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn test_retryable() {
        assert!(PoolmateError::RedisConnection("down".into()).is_retryable());
        assert!(PoolmateError::conflict("lost race").is_retryable());
        assert!(!PoolmateError::not_authorized("no").is_retryable());
        assert!(!PoolmateError::invalid_transition("x", "pending", "start").is_retryable());
    }
}
