//! Error rendering for axum handlers.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use clinic_core::{AppError, RequestLogContext};
use clinic_identity::IdentityError;

/// An error on its way to the client.
///
/// Logged once, through redaction, when turned into a response.
#[derive(Debug)]
pub struct ApiError {
    error: AppError,
    request: Option<RequestLogContext>,
}

impl ApiError {
    /// Wrap an error.
    #[must_use]
    pub const fn new(error: AppError) -> Self {
        Self {
            error,
            request: None,
        }
    }

    /// Attach the request the error belongs to.
    #[must_use]
    pub fn with_request(mut self, request: RequestLogContext) -> Self {
        self.request = Some(request);
        self
    }

    /// The underlying error.
    #[must_use]
    pub const fn error(&self) -> &AppError {
        &self.error
    }

    /// Transport status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<AppError> for ApiError {
    fn from(error: AppError) -> Self {
        Self::new(error)
    }
}

impl From<IdentityError> for ApiError {
    fn from(error: IdentityError) -> Self {
        Self::new(error.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.error.log(self.request.as_ref());
        (self.status(), Json(self.error.to_response())).into_response()
    }
}
