//! HTTP-layer errors.
//!
//! Only read endpoints and the auth layer use these. Play, stop and favorite
//! toggles report failures inside a 200 `{success, message}` envelope.
//!
//! Bodies have the shape `{"error": {"code": "...", "message": "..."}}`.
//! Catalog failures are logged here and reach the client as a generic message.

use crate::auth::AuthError;
use crate::catalog::CatalogError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

const WWW_AUTHENTICATE: &str = "Bearer realm=\"channel-relay\", error=\"invalid_token\"";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The resource exists but nothing can be served right now.
    #[error("{0}")]
    Unavailable(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RelayError::NotFound(_) | RelayError::Catalog(CatalogError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            RelayError::Catalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable machine-readable code for the body.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Unauthorized(_) => "UNAUTHORIZED",
            RelayError::NotFound(_) | RelayError::Catalog(CatalogError::NotFound(_)) => {
                "NOT_FOUND"
            }
            RelayError::Catalog(_) => "CATALOG_ERROR",
            RelayError::Unavailable(_) => "UNAVAILABLE",
        }
    }

    fn client_message(&self) -> String {
        match self {
            RelayError::Catalog(CatalogError::NotFound(_)) => self.to_string(),
            RelayError::Catalog(_) => "The channel catalog is unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(target: "relay.errors", error = %self, "Request failed");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.client_message(),
            },
        };
        let mut response = (status, Json(body)).into_response();

        if matches!(self, RelayError::Unauthorized(_)) {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(WWW_AUTHENTICATE),
            );
        }

        response
    }
}
