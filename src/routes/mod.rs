pub mod proxy;

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use owc_core::ProxyError;
use tracing::{error, warn};

/// Convert proxy errors to plain-text HTTP responses
#[derive(Debug)]
pub struct AppError(pub ProxyError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self.0 {
            ProxyError::AccessDenied => warn!("{}", self.0),
            other => error!("{other}"),
        }

        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            ],
            self.0.to_string(),
        )
            .into_response()
    }
}

impl From<ProxyError> for AppError {
    fn from(err: ProxyError) -> Self {
        Self(err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self(crate::upstream::upstream_error(err))
    }
}
