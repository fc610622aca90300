use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

pub type Result<T> = std::result::Result<T, BoardError>;

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid captcha")]
    InvalidCaptcha,
    #[error("wrong login credentials")]
    InvalidCredentials,
    #[error("invalid otp")]
    OtpMismatch,
    #[error("no verification is pending for this email")]
    NoPendingVerification,
    #[error("{0}")]
    DuplicateIdentity(&'static str),
    #[error("no account found with this email")]
    AccountNotFound,

    #[error("post authority required")]
    Forbidden,
    #[error("authentication required")]
    Unauthenticated,
    #[error("too many attempts, try again later")]
    RateLimited,

    #[error("notice not found")]
    NoticeNotFound,
    #[error("notices can only be reordered in the unfiltered view")]
    ReorderRejected,
    #[error("an attachment upload is already in progress")]
    UploadInFlight,
    #[error("attachment rejected: {0}")]
    AttachmentRejected(String),

    #[error("remote service failed: {0}")]
    Remote(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BoardError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            BoardError::Validation(_) => "validation",
            BoardError::InvalidCaptcha => "invalid_captcha",
            BoardError::InvalidCredentials => "invalid_credentials",
            BoardError::OtpMismatch => "otp_mismatch",
            BoardError::NoPendingVerification => "no_pending_verification",
            BoardError::DuplicateIdentity(_) => "duplicate_identity",
            BoardError::AccountNotFound => "account_not_found",
            BoardError::Forbidden => "forbidden",
            BoardError::Unauthenticated => "unauthenticated",
            BoardError::RateLimited => "rate_limited",
            BoardError::NoticeNotFound => "not_found",
            BoardError::ReorderRejected => "reorder_rejected",
            BoardError::UploadInFlight => "upload_in_flight",
            BoardError::AttachmentRejected(_) => "attachment_rejected",
            BoardError::Remote(_) => "remote_failure",
            BoardError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            BoardError::Validation(_)
            | BoardError::InvalidCaptcha
            | BoardError::OtpMismatch
            | BoardError::AttachmentRejected(_) => StatusCode::BAD_REQUEST,
            BoardError::InvalidCredentials | BoardError::Unauthenticated => {
                StatusCode::UNAUTHORIZED
            }
            BoardError::Forbidden => StatusCode::FORBIDDEN,
            BoardError::NoPendingVerification
            | BoardError::AccountNotFound
            | BoardError::NoticeNotFound => StatusCode::NOT_FOUND,
            BoardError::DuplicateIdentity(_)
            | BoardError::ReorderRejected
            | BoardError::UploadInFlight => StatusCode::CONFLICT,
            BoardError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            BoardError::Remote(_) => StatusCode::BAD_GATEWAY,
            BoardError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResp {
    error: &'static str,
    message: String,
}

impl IntoResponse for BoardError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            BoardError::Internal(err) => {
                tracing::error!(error = %err, "request failed");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (
            status,
            Json(ErrorResp {
                error: self.code(),
                message,
            }),
        )
            .into_response()
    }
}
