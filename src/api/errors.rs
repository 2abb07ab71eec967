// 统一错误响应：固定结构 + trace_id，内部细节不出网。
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

pub(crate) const TRACE_HEADER: &str = "x-trace-id";
pub(crate) const ERROR_CODE_HEADER: &str = "x-error-code";

#[derive(Debug, Clone)]
pub(crate) struct ErrorMeta {
    pub code: String,
    pub message: String,
    pub status: u16,
    pub trace_id: String,
    pub timestamp: f64,
}

impl ErrorMeta {
    pub(crate) fn to_value(&self) -> Value {
        json!({
            "code": self.code,
            "message": self.message,
            "status": self.status,
            "trace_id": self.trace_id,
            "timestamp": self.timestamp,
        })
    }
}

pub(crate) fn build_error_meta(
    status: StatusCode,
    code: Option<&str>,
    message: impl Into<String>,
) -> ErrorMeta {
    let code = code
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default_error_code(status))
        .to_string();
    ErrorMeta {
        code,
        message: message.into(),
        status: status.as_u16(),
        trace_id: format!("err_{}", Uuid::new_v4().simple()),
        timestamp: crate::storage::now_ts(),
    }
}

pub(crate) fn status_for_error_code(code: &str) -> StatusCode {
    match code.trim().to_ascii_uppercase().as_str() {
        "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
        "NOT_FOUND" | "TASK_NOT_FOUND" => StatusCode::NOT_FOUND,
        "DATABASE_ERROR" | "SERVICE_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
        "INTERNAL_ERROR" => StatusCode::INTERNAL_SERVER_ERROR,
        // VALIDATION_ERROR / INVALID_REQUEST 以及未知码都按客户端错误处理。
        _ => StatusCode::BAD_REQUEST,
    }
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    error_response_with_code(status, None, message)
}

pub fn error_response_with_code(
    status: StatusCode,
    code: Option<&str>,
    message: impl Into<String>,
) -> Response {
    let meta = build_error_meta(status, code, message);
    let payload = json!({
        "ok": false,
        "error": meta.to_value(),
    });

    let mut response = (status, Json(payload)).into_response();
    if let Ok(value) = HeaderValue::from_str(&meta.trace_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(TRACE_HEADER), value);
    }
    if let Ok(value) = HeaderValue::from_str(&meta.code) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(ERROR_CODE_HEADER), value);
    }
    response
}

fn default_error_code(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "VALIDATION_ERROR",
        StatusCode::UNAUTHORIZED => "UNAUTHORIZED",
        StatusCode::NOT_FOUND => "NOT_FOUND",
        StatusCode::SERVICE_UNAVAILABLE => "SERVICE_UNAVAILABLE",
        _ if status.is_server_error() => "INTERNAL_ERROR",
        _ => "REQUEST_ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn error_response_carries_trace_headers() {
        let response = error_response(StatusCode::BAD_REQUEST, "invalid payload");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let trace_id = response
            .headers()
            .get(TRACE_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(trace_id.starts_with("err_"));
        assert_eq!(
            response
                .headers()
                .get(ERROR_CODE_HEADER)
                .and_then(|value| value.to_str().ok()),
            Some("VALIDATION_ERROR")
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload["ok"], false);
        assert_eq!(payload["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(payload["error"]["message"], "invalid payload");
        assert_eq!(payload["error"]["trace_id"], trace_id);
    }

    #[test]
    fn gateway_codes_map_to_expected_status() {
        assert_eq!(
            status_for_error_code("TASK_NOT_FOUND"),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_for_error_code("UNAUTHORIZED"), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for_error_code("DATABASE_ERROR"),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for_error_code("VALIDATION_ERROR"),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for_error_code("INTERNAL_ERROR"),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
