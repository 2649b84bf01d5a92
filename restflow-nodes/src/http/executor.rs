//! executor.rs
//!
//! 发出一次 HTTP 调用。非 2xx 不在这里报错，交给 classifier 处理。

use bytes::Bytes;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

use crate::http::request::{Headers, RequestSpec};
use crate::node_type::NodeError;
use crate::settings::Settings;

/// 执行器返回的原始响应。body 保持原始字节。
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub status: u16,
    /// 标准的状态描述，未知状态码为 None。
    pub status_message: Option<String>,
    /// 小写 header 名；多值 header 用 `, ` 连接。
    pub headers: Headers,
    pub body: Bytes,
}

impl ResponseEnvelope {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }
}

/// 按重定向策略构建客户端。gzip 响应会被透明解压。
pub fn build_client(settings: &Settings, follow_redirects: bool) -> Result<Client, NodeError> {
    let policy = if follow_redirects {
        Policy::limited(settings.max_redirects)
    } else {
        Policy::none()
    };
    Client::builder()
        .redirect(policy)
        .gzip(true)
        .timeout(settings.request_timeout)
        .build()
        .map_err(|e| NodeError::Config(format!("HTTP client error: {e}")))
}

pub async fn execute(client: &Client, spec: &RequestSpec) -> Result<ResponseEnvelope, NodeError> {
    let mut builder = client.request(spec.method.into(), &spec.url);
    for (name, value) in &spec.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &spec.body {
        builder = builder.body(body.clone());
    }

    debug!(method = spec.method.as_str(), url = %spec.url, "sending request");
    let response = builder.send().await.map_err(|e| NodeError::from_reqwest(&e))?;

    let status = response.status();
    let mut headers = Headers::new();
    for (name, value) in response.headers() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        headers
            .entry(name.as_str().to_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    let body = response.bytes().await.map_err(|e| NodeError::from_reqwest(&e))?;

    info!(
        status = status.as_u16(),
        content_type = headers.get("content-type").map(String::as_str).unwrap_or(""),
        size = body.len(),
        "response received"
    );
    Ok(ResponseEnvelope {
        status: status.as_u16(),
        status_message: status_message(status),
        headers,
        body,
    })
}

/// hyper 不保留线上的 reason phrase，这里统一用标准短语：204 是 "No Content"，
/// 404 是 "Not Found"。只有非标准状态码为 None。
fn status_message(status: StatusCode) -> Option<String> {
    status.canonical_reason().map(str::to_owned)
}
