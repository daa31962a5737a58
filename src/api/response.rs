//! JSON envelope
//!
//! 成功：`{"success":true,"data":..}`
//! 失败：`{"success":false,"error":{"code":"..","message":".."}}`

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use tracing::error;

use crate::errors::AfftrackError;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

pub fn success_response<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok()
        .append_header(("Content-Type", "application/json; charset=utf-8"))
        .json(ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        })
}

pub fn error_response(status: StatusCode, code: &str, message: &str) -> HttpResponse {
    HttpResponse::build(status)
        .append_header(("Content-Type", "application/json; charset=utf-8"))
        .json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        })
}

/// Result → HttpResponse
pub fn api_result<T: Serialize>(result: crate::errors::Result<T>) -> HttpResponse {
    match result {
        Ok(data) => success_response(data),
        Err(e) => e.error_response(),
    }
}

impl ResponseError for AfftrackError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            // 内部错误不把细节暴露给调用方
            error!("Request failed: {}", self.format_simple());
            return error_response(status, self.api_code(), "internal error");
        }
        error_response(status, self.api_code(), self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_rt::test]
    async fn error_envelope() {
        let resp = AfftrackError::invalid_api_key("bad key").error_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "INVALID_API_KEY");
        assert_eq!(json["error"]["message"], "bad key");
        assert!(json.get("data").is_none());
    }

    #[actix_rt::test]
    async fn internal_errors_are_masked() {
        let resp = AfftrackError::database_operation("connection refused at 10.0.0.5").error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(json["error"]["message"], "internal error");
    }

    #[actix_rt::test]
    async fn success_envelope() {
        let resp = success_response(serde_json::json!({"conversion_id": "c1"}));
        let body = to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["conversion_id"], "c1");
    }
}
