//! 错误到HTTP响应的映射

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use radsim_core::RadSimError;
use serde_json::json;
use tracing::error;

/// HTTP层错误
#[derive(Debug)]
pub struct ApiError(pub RadSimError);

impl From<RadSimError> for ApiError {
    fn from(e: RadSimError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RadSimError::Validation(_) => StatusCode::BAD_REQUEST,
            RadSimError::NotFound(_) => StatusCode::NOT_FOUND,
            RadSimError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RadSimError::Archive(_) => StatusCode::BAD_GATEWAY,
            RadSimError::Config(_)
            | RadSimError::Storage(_)
            | RadSimError::Hl7(_)
            | RadSimError::Network(_)
            | RadSimError::Serialization(_)
            | RadSimError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if self.0.is_user_facing() || status == StatusCode::BAD_GATEWAY {
            self.0.to_string()
        } else {
            error!(error = %self.0, "request failed");
            "系统内部错误".to_string()
        };

        let body = Json(json!({
            "error": true,
            "message": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// 处理器统一结果类型
pub type ApiResult<T> = std::result::Result<T, ApiError>;
