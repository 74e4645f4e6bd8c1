use rocket::http::{ContentType, Status};
use rocket::response::Responder;
use serde_json::json;
use std::io::Cursor;
use thiserror::Error;
use tracing::{error, warn, Span};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Authentication(_) => "authentication_error",
            AppError::Authorization(_) => "authorization_error",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation_error",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidState(_) => "invalid_state",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn log_and_record(&self, ctx: &str) {
        let message = self.to_string();
        match self {
            AppError::Database(err) => {
                error!(error = %message, context = %ctx, db_error = %err, "Database error")
            }
            AppError::Internal(msg) => {
                error!(message = %msg, context = %ctx, "Internal server error")
            }
            AppError::Authentication(msg) => {
                warn!(message = %msg, context = %ctx, "Authentication error")
            }
            AppError::Authorization(msg) => {
                warn!(message = %msg, context = %ctx, "Authorization error")
            }
            AppError::NotFound(msg) => warn!(message = %msg, context = %ctx, "Not found"),
            AppError::Validation(msg) => warn!(message = %msg, context = %ctx, "Validation error"),
            AppError::Conflict(msg) => warn!(message = %msg, context = %ctx, "Conflict"),
            AppError::InvalidState(msg) => {
                warn!(message = %msg, context = %ctx, "Invalid state transition")
            }
        }

        let current_span = Span::current();
        if !current_span.is_none() {
            current_span.record("error", tracing::field::display(true));
            current_span.record("error.kind", tracing::field::display(self.kind()));
            current_span.record("error.message", tracing::field::display(&message));
        }
    }

    pub fn status_code(&self) -> Status {
        match self {
            AppError::Database(_) => Status::InternalServerError,
            AppError::Authentication(_) => Status::Unauthorized,
            AppError::Authorization(_) => Status::Forbidden,
            AppError::NotFound(_) => Status::NotFound,
            AppError::Validation(_) => Status::BadRequest,
            AppError::Conflict(_) => Status::Conflict,
            AppError::InvalidState(_) => Status::Conflict,
            AppError::Internal(_) => Status::InternalServerError,
        }
    }
}

// Errors surface to clients as a structured payload rather than a bare status,
// so the operator console can show the message directly.
impl<'r> Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        self.log_and_record(&format!("Request to {} {}", req.method(), req.uri()));

        let message = match &self {
            // Driver detail stays in the logs, not in the response
            AppError::Database(_) | AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        let body = json!({
            "error": self.kind(),
            "message": message,
        })
        .to_string();

        rocket::Response::build()
            .status(self.status_code())
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(error: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("Cryptography error: {}", error))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {}", error))
    }
}
