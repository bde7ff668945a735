//! API 错误定义与响应转换。

use axum::{Json, http::StatusCode};
use serde::Serialize;

use super::response::ApiEnvelope;

/// 接口错误：状态码 + 稳定错误码 + 提示。
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) code: &'static str,
    pub(crate) message: String,
    pub(crate) suggestion: &'static str,
}

impl ApiError {
    /// 构造统一 API 错误。
    pub(crate) fn new(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        suggestion: &'static str,
    ) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            suggestion,
        }
    }

    /// 不暴露细节的内部错误。
    pub(crate) fn internal(code: &'static str) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            code,
            "服务暂时不可用",
            "请稍后重试",
        )
    }

    /// 缺少必填令牌。
    pub(crate) fn missing_token() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "MISSING_TOKEN",
            "缺少 token",
            "请重新扫码或刷新页面",
        )
    }

    /// 转换为统一响应体，`data` 类型随调用处推断。
    pub(crate) fn into_response<T: Serialize>(self) -> (StatusCode, Json<ApiEnvelope<T>>) {
        (
            self.status,
            Json(ApiEnvelope {
                ok: false,
                code: self.code.to_string(),
                message: self.message,
                suggestion: self.suggestion.to_string(),
                data: None,
            }),
        )
    }
}
