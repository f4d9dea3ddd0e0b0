use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info};

use crate::response::{Envelope, ErrorBody};
use crate::validator::FieldError;

/// Coarse classification of a [`BookError`], used to pick the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    NotFoundByAuthor,
    NotFoundByTitle,
    BadRequest,
    Validation,
    InvalidSerial,
    EmptyBody,
    PayloadTooLarge,
    AlreadyExists,
    CouldNotQuery,
    Unexpected,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::NotFound | ErrorKind::NotFoundByAuthor | ErrorKind::NotFoundByTitle => {
                StatusCode::NOT_FOUND
            }
            ErrorKind::BadRequest
            | ErrorKind::Validation
            | ErrorKind::InvalidSerial
            | ErrorKind::EmptyBody => StatusCode::BAD_REQUEST,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::CouldNotQuery | ErrorKind::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BookError {
    #[error("Book(s) not found in db")]
    NotFound,

    #[error("Book(s) with author {0} not found in db")]
    NotFoundByAuthor(String),

    #[error("Book(s) with title {0} not found in db")]
    NotFoundByTitle(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{}", join_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("Invalid serial. Serial must be more than 1")]
    InvalidSerial,

    #[error("Expected body, found EOF")]
    EmptyBody,

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("Requested title already exists")]
    AlreadyExists,

    #[error("Could not execute query: {0}")]
    CouldNotQuery(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| f.msg.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl BookError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookError::NotFound => ErrorKind::NotFound,
            BookError::NotFoundByAuthor(_) => ErrorKind::NotFoundByAuthor,
            BookError::NotFoundByTitle(_) => ErrorKind::NotFoundByTitle,
            BookError::BadRequest(_) => ErrorKind::BadRequest,
            BookError::Validation(_) => ErrorKind::Validation,
            BookError::InvalidSerial => ErrorKind::InvalidSerial,
            BookError::EmptyBody => ErrorKind::EmptyBody,
            BookError::PayloadTooLarge(_) => ErrorKind::PayloadTooLarge,
            BookError::AlreadyExists => ErrorKind::AlreadyExists,
            BookError::CouldNotQuery(_) => ErrorKind::CouldNotQuery,
            BookError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.kind().status()
    }

    /// The `error` half of the response envelope.
    pub fn body(&self) -> ErrorBody {
        match self {
            BookError::Validation(fields) => ErrorBody {
                msg: None,
                fields: fields.clone(),
            },
            other => ErrorBody {
                msg: Some(other.to_string()),
                fields: Vec::new(),
            },
        }
    }
}

impl IntoResponse for BookError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(status = status.as_u16(), kind = ?self.kind(), "{}", self);
        } else {
            info!(status = status.as_u16(), kind = ?self.kind(), "{}", self);
        }

        let envelope: Envelope<()> = Envelope::failure(self.body());
        (status, Json(envelope)).into_response()
    }
}
