// src/http/classifier.rs

use tracing::warn;

use crate::http::executor::ResponseEnvelope;
use crate::node_type::{NodeError, REBOUND_STATUS_CODES};

/// 状态码分类所需的开关。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorPolicy {
    pub follow_redirects: bool,
    pub dont_throw: bool,
    pub enable_rebound: bool,
}

/// 按状态码决定放行还是报错。放行的响应交给 decoder。
///
/// - 2xx 放行；
/// - 3xx：关闭重定向时当作普通响应放行；开启时说明重定向没有被跟随，按错误处理；
/// - 其它：`dont_throw` 时放行，否则报 [`NodeError::HttpStatus`]。
///
/// 开启 rebound 时，可重投的状态码总是报错，不受 `dont_throw` 影响。
pub fn classify(response: ResponseEnvelope, policy: ErrorPolicy) -> Result<ResponseEnvelope, NodeError> {
    let status = response.status;
    if policy.enable_rebound && REBOUND_STATUS_CODES.contains(&status) {
        return Err(status_error(&response));
    }

    match status {
        200..=299 => Ok(response),
        300..=399 if !policy.follow_redirects => Ok(response),
        _ if policy.dont_throw => Ok(response),
        _ => {
            warn!(status, "HTTP request failed");
            Err(status_error(&response))
        }
    }
}

fn status_error(response: &ResponseEnvelope) -> NodeError {
    NodeError::HttpStatus {
        code: response.status,
        message: response
            .status_message
            .clone()
            .unwrap_or_else(|| "HTTP error".to_owned()),
        body: String::from_utf8_lossy(&response.body).into_owned(),
    }
}
