//! 小组会话与管理接口认证
//!
//! 小组代码通过 `radsim_group` Cookie（由 join/session 接口设置）或
//! `x-group-code` 请求头携带，每次请求都重新规范化并对照注册表校验。
//! 管理接口使用独立的 Bearer 令牌。

use axum::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use radsim_core::{GroupCode, RadSimError};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// 会话Cookie名
pub const GROUP_COOKIE: &str = "radsim_group";

/// 小组代码请求头
pub const GROUP_HEADER: &str = "x-group-code";

/// 已校验的小组代码
#[derive(Debug, Clone)]
pub struct Tenant(pub GroupCode);

#[async_trait]
impl FromRequestParts<AppState> for Tenant {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = presented_code(&parts.headers).ok_or_else(|| {
            ApiError(RadSimError::Unauthorized(
                "需要小组代码，请先访问 /join/{code}".to_string(),
            ))
        })?;

        match state.orchestrator.resolve_tenant(&raw).await {
            Ok(code) => Ok(Tenant(code)),
            Err(RadSimError::Validation(msg)) => {
                debug!(%msg, "rejected session group code");
                Err(ApiError(RadSimError::Unauthorized(format!(
                    "{}，请重新访问 /join/{{code}}",
                    msg
                ))))
            }
            Err(e) => Err(ApiError(e)),
        }
    }
}

/// 请求中携带的原始小组代码；请求头优先于Cookie
pub fn presented_code(headers: &HeaderMap) -> Option<String> {
    let from_header = headers
        .get(GROUP_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(code) = from_header {
        return Some(code.to_string());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == GROUP_COOKIE && !value.trim().is_empty())
        .map(|(_, value)| value.trim().to_string())
}

/// 设置会话Cookie的响应头
pub fn session_cookie(code: &GroupCode) -> (axum::http::HeaderName, HeaderValue) {
    // 规范化代码只含 [A-Za-z0-9_-]，总是合法的头部值
    let value = HeaderValue::from_str(&format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        GROUP_COOKIE, code
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("radsim_group=; Path=/"));
    (SET_COOKIE, value)
}

/// 清除会话Cookie的响应头
pub fn clear_session_cookie() -> (axum::http::HeaderName, HeaderValue) {
    (
        SET_COOKIE,
        HeaderValue::from_static("radsim_group=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    )
}

/// 管理接口认证中间件
///
/// 未配置令牌时管理接口整体不存在（404）。
pub async fn admin_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.admin_enabled() {
        return Err(ApiError(RadSimError::NotFound("管理接口未启用".to_string())));
    }

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match token {
        Some(token) if state.verify_admin_token(token) => Ok(next.run(request).await),
        Some(_) => {
            warn!("rejected admin request with invalid token");
            Err(ApiError(RadSimError::Unauthorized("无效的管理令牌".to_string())))
        }
        None => Err(ApiError(RadSimError::Unauthorized("缺少管理令牌".to_string()))),
    }
}
