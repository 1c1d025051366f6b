// error.rs
use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Structural problems with a poll definition.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("question must not be empty")]
    MissingQuestion,

    #[error("a poll needs at least 2 options")]
    InsufficientOptions,

    #[error("provide either options or image_options, not both")]
    AmbiguousOptions,

    #[error("option labels must not be empty")]
    EmptyOptionLabel,

    #[error("every image option needs an image_url")]
    MissingImageReference,

    #[error("max_selections must be between 1 and the number of options")]
    InvalidMaxSelections,
}

impl ValidationError {
    pub fn kind(self) -> &'static str {
        match self {
            ValidationError::MissingQuestion => "missing-question",
            ValidationError::InsufficientOptions => "insufficient-options",
            ValidationError::AmbiguousOptions => "ambiguous-options",
            ValidationError::EmptyOptionLabel => "empty-option-label",
            ValidationError::MissingImageReference => "missing-image-reference",
            ValidationError::InvalidMaxSelections => "invalid-max-selections",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Poll not found")]
    NotFound,

    #[error("Option index {index} is out of range for a poll with {option_count} options")]
    OutOfRange { index: i64, option_count: usize },

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("A vote from this address was already recorded for this poll")]
    AlreadyVoted,

    #[error("Repeat votes are rejected, but this request has no voter address")]
    MissingVoterAddress,

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Corrupt poll record: {0}")]
    CorruptRecord(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(v) => v.kind(),
            AppError::NotFound => "not-found",
            AppError::OutOfRange { .. } => "out-of-range",
            AppError::InvalidSelection(_) => "invalid-selection",
            AppError::AlreadyVoted => "already-voted",
            AppError::MissingVoterAddress => "missing-voter-address",
            AppError::MalformedRequest(_) => "malformed-request",
            AppError::Persistence(_) | AppError::CorruptRecord(_) => "persistence",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::OutOfRange { .. }
            | AppError::InvalidSelection(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::AlreadyVoted => StatusCode::CONFLICT,
            AppError::MissingVoterAddress | AppError::MalformedRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Persistence(_) | AppError::CorruptRecord(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::MalformedRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::MalformedRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::MalformedRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Store failures are logged in full but reach the client as a generic message.
        let message = if status.is_server_error() {
            error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({ "error": self.kind(), "message": message }));
        (status, body).into_response()
    }
}
