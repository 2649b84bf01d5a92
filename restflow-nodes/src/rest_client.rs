//! rest_client.rs
//!
//! 平台内部调用使用的轻量 REST 客户端 (附件存储申请 signed URL 等)。
//! 只负责 "拼 URL + 加认证 + 检查状态码"，不做任何重试。

use derivative::Derivative;
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::debug;

use crate::node_type::NodeError;

/// 客户端认证方式。
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub enum ClientAuth {
    NoAuth,
    Basic {
        username: String,
        #[derivative(Debug = "ignore")]
        password: String,
    },
    ApiKey {
        header_name: String,
        #[derivative(Debug = "ignore")]
        header_value: String,
    },
}

/// 单次请求的参数。
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub url: String,
    pub body: Option<RequestBody>,
    pub headers: Vec<(String, String)>,
    /// 为 true 时 `url` 是相对 `base_url` 的路径片段，否则是完整地址。
    pub url_is_segment: bool,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(Value),
    Bytes(Vec<u8>),
}

impl RequestOptions {
    pub fn new(method: Method, url: &str) -> Self {
        Self {
            method,
            url: url.to_string(),
            body: None,
            headers: Vec::new(),
            url_is_segment: true,
        }
    }

    pub fn absolute(mut self) -> Self {
        self.url_is_segment = false;
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    auth: ClientAuth,
}

impl RestClient {
    pub fn new(http: Client, base_url: &str, auth: ClientAuth) -> Self {
        Self {
            http,
            base_url: base_url.trim().to_string(),
            auth,
        }
    }

    /// 计算最终请求地址：片段拼接到 base_url 上，中间只保留一个 `/`，去掉末尾 `/`。
    pub fn resolve_url(&self, options: &RequestOptions) -> String {
        if !options.url_is_segment {
            return options.url.trim().to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let segment = options.url.trim().trim_start_matches('/');
        format!("{base}/{segment}").trim_end_matches('/').to_string()
    }

    /// 发送请求，返回响应 body。JSON 响应解析为对象，其他内容作为字符串返回。
    pub async fn make_request(&self, options: RequestOptions) -> Result<Value, NodeError> {
        let url = self.resolve_url(&options);
        debug!(method = %options.method, url = %url, "rest client request");

        let mut builder = self.http.request(options.method.clone(), &url);
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &self.auth {
            ClientAuth::NoAuth => builder,
            ClientAuth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            ClientAuth::ApiKey {
                header_name,
                header_value,
            } => builder.header(header_name.as_str(), header_value.as_str()),
        };
        builder = match options.body {
            Some(RequestBody::Json(json)) => builder.json(&json),
            Some(RequestBody::Bytes(bytes)) => builder.body(bytes),
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| NodeError::from_reqwest(&e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| NodeError::from_reqwest(&e))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        if status.as_u16() >= 400 {
            return Err(NodeError::transport(
                "EHTTPSTATUS",
                format!(
                    "Error in making request to {} Status code: {}, Body: {}",
                    options.url,
                    status.as_u16(),
                    body
                ),
            ));
        }
        Ok(body)
    }
}
