use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::state_machine::{AbortError, ApplyError, PlanError},
};

/// Stable error codes carried by the outbound `error` event.
pub mod codes {
    /// Missing or malformed fields.
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    /// A non-host identity attempted a host-only action.
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    /// The action is not valid in the current session or round status.
    pub const INVALID_STATE: &str = "INVALID_STATE";
    /// Session, round, question or player could not be found.
    pub const NOT_FOUND: &str = "NOT_FOUND";
    /// The player already has an accepted answer for the question.
    pub const ALREADY_ANSWERED: &str = "ALREADY_ANSWERED";
    /// The connection exceeded its admission window for an event type.
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    /// Anything unexpected, including storage failures.
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running without a storage backend.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Round type outside of the supported set.
    #[error("invalid round type `{0}`")]
    InvalidRoundType(String),
    /// Host-only action attempted by another identity.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Round number unknown to the session.
    #[error("round {0} not found")]
    RoundNotFound(u32),
    /// Answer targets a question that is not the active one.
    #[error("question `{0}` is not active")]
    QuestionInactive(Uuid),
    /// A record already exists for this (player, question) pair.
    #[error("player `{player_id}` already answered question `{question_id}`")]
    AlreadyAnswered {
        /// Player who tried to answer again.
        player_id: String,
        /// Question targeted by the duplicate submission.
        question_id: Uuid,
    },
    /// Too many events of one type from a connection.
    #[error("rate limit exceeded for `{event}`, retry after {retry_after}s")]
    RateLimitExceeded {
        /// Event type that tripped the limiter.
        event: String,
        /// Seconds until the window admits the next event.
        retry_after: u64,
    },
    /// Unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable code exposed to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidInput(_) | ServiceError::InvalidRoundType(_) => {
                codes::VALIDATION_ERROR
            }
            ServiceError::PermissionDenied(_) => codes::PERMISSION_DENIED,
            ServiceError::InvalidState(_) | ServiceError::QuestionInactive(_) => {
                codes::INVALID_STATE
            }
            ServiceError::NotFound(_) | ServiceError::RoundNotFound(_) => codes::NOT_FOUND,
            ServiceError::AlreadyAnswered { .. } => codes::ALREADY_ANSWERED,
            ServiceError::RateLimitExceeded { .. } => codes::RATE_LIMIT_EXCEEDED,
            ServiceError::Unavailable(_) | ServiceError::Degraded | ServiceError::Internal(_) => {
                codes::INTERNAL_ERROR
            }
        }
    }

    /// Seconds a rate-limited client should wait, if applicable.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ServiceError::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {err}"))
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Caller is not allowed to perform the action.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Caller must slow down.
    #[error("too many requests: {0}")]
    TooManyRequests(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::InvalidInput(_) | ServiceError::InvalidRoundType(_) => {
                AppError::BadRequest(message)
            }
            ServiceError::PermissionDenied(_) => AppError::Forbidden(message),
            ServiceError::InvalidState(_)
            | ServiceError::QuestionInactive(_)
            | ServiceError::AlreadyAnswered { .. } => AppError::Conflict(message),
            ServiceError::NotFound(_) | ServiceError::RoundNotFound(_) => {
                AppError::NotFound(message)
            }
            ServiceError::RateLimitExceeded { .. } => AppError::TooManyRequests(message),
            ServiceError::Internal(_) => AppError::Internal(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                ServiceError::InvalidState("state transition already pending".into())
            }
            PlanError::InvalidTransition(invalid) => {
                ServiceError::InvalidState(invalid.to_string())
            }
        }
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => ServiceError::Internal("no transition is pending".into()),
            ApplyError::IdMismatch { .. } => {
                ServiceError::Internal("pending transition does not match".into())
            }
            ApplyError::StatusMismatch { expected, actual } => ServiceError::Internal(format!(
                "status changed during transition (expected {expected:?}, got {actual:?})"
            )),
        }
    }
}

impl From<AbortError> for ServiceError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => ServiceError::Internal("no pending transition".into()),
            AbortError::IdMismatch { .. } => {
                ServiceError::Internal("transition plan does not match".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fine_grained_failures_map_onto_the_stable_codes() {
        assert_eq!(
            ServiceError::InvalidRoundType("lightning".into()).code(),
            codes::VALIDATION_ERROR
        );
        assert_eq!(ServiceError::RoundNotFound(3).code(), codes::NOT_FOUND);
        assert_eq!(
            ServiceError::QuestionInactive(Uuid::nil()).code(),
            codes::INVALID_STATE
        );
        assert_eq!(ServiceError::Degraded.code(), codes::INTERNAL_ERROR);
    }

    #[test]
    fn only_rate_limit_errors_carry_retry_after() {
        let limited = ServiceError::RateLimitExceeded {
            event: "answer:submit".into(),
            retry_after: 4,
        };
        assert_eq!(limited.retry_after(), Some(4));
        assert_eq!(ServiceError::Internal("boom".into()).retry_after(), None);
    }
}
