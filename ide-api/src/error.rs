use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ide_operator::{Code, ServiceError};
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub ServiceError);

pub fn status_for(code: Code) -> StatusCode {
    match code {
        Code::AlreadyExists => StatusCode::CONFLICT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::Internal | Code::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let body = json!({ "code": code.as_str(), "error": self.0.to_string() });
        (status_for(code), Json(body)).into_response()
    }
}
