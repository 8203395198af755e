//! Maps the SDK's [`GatewayError`] onto an HTTP response. A thin newtype is
//! used instead of implementing `IntoResponse` directly on `GatewayError`
//! since neither the trait nor the type live in this crate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use ultrafast_models_sdk::error::GatewayError;

pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.as_json())).into_response()
    }
}
