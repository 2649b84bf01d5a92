// src/http/http_params.rs

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::http::auth::AuthConfig;
use crate::node_type::NodeError;

/// 支持的 HTTP 方法。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Delete,
    Get,
    Patch,
    Post,
    Put,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 5] = [
        HttpMethod::Delete,
        HttpMethod::Get,
        HttpMethod::Patch,
        HttpMethod::Post,
        HttpMethod::Put,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Delete => "DELETE",
            HttpMethod::Get => "GET",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }

    /// 严格匹配大写方法名。
    pub fn parse(method: &str) -> Result<Self, NodeError> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == method)
            .ok_or_else(|| {
                let allowed: Vec<&str> = Self::ALL.iter().map(HttpMethod::as_str).collect();
                NodeError::Config(format!(
                    "Method \"{method}\" isn't one of the: {}.",
                    allowed.join(",")
                ))
            })
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
        }
    }
}

/// 一个 header 配置项，`value` 是表达式。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeaderEntry {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
    /// 凭证 header 的标记，见 [`CREDS_HEADER_TYPE`](crate::http::auth::CREDS_HEADER_TYPE)。
    #[serde(default, rename = "_type")]
    pub header_type: Option<String>,
}

/// `{key, value}` 形式的 body 字段，`value` 是表达式。
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// form-data 字段；带 `filename` 时 `value` 是要下载并内联的文件地址。
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDataEntry {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// 原始的 body 配置，编码方式由 `contentType` 决定。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyConfig {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub raw: Option<String>,
    #[serde(default)]
    pub form_data: Vec<FormDataEntry>,
    #[serde(default)]
    pub urlencoded: Vec<KeyValue>,
}

/// `cfg.reader`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReaderConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
    #[serde(default)]
    pub body: Option<BodyConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum FollowRedirect {
    #[default]
    #[serde(rename = "followRedirects")]
    Follow,
    #[serde(rename = "doNotFollowRedirects")]
    DoNotFollow,
}

/// 手动指定的响应解析方式，优先于响应的 content-type。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum ContentTypeOverride {
    #[default]
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "parseAsJSON")]
    ParseAsJson,
    #[serde(rename = "parseAsXML")]
    ParseAsXml,
    #[serde(rename = "treatAsText")]
    TreatAsText,
    #[serde(rename = "storeAsAttachment")]
    StoreAsAttachment,
}

/// HTTP 节点的完整配置。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpParams {
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub follow_redirect: FollowRedirect,
    #[serde(default, deserialize_with = "flag")]
    pub dont_throw_error_flg: bool,
    #[serde(default, deserialize_with = "flag")]
    pub split_result: bool,
    #[serde(default, deserialize_with = "flag")]
    pub enable_rebound: bool,
    #[serde(default, deserialize_with = "flag")]
    pub xml_to_attach: bool,
    #[serde(default)]
    pub override_content_type: ContentTypeOverride,
}

/// 布尔开关既可能是 `true`，也可能是字符串 `"true"`。
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

impl HttpParams {
    pub fn from_value(parameters: &Value) -> Result<Self, NodeError> {
        serde_json::from_value(parameters.clone())
            .map_err(|e| NodeError::Config(format!("Param parse error: {e}")))
    }

    /// 校验 URL 模板和 method，返回解析好的 method。
    pub fn validate(&self) -> Result<HttpMethod, NodeError> {
        match self.reader.url.as_deref() {
            Some(url) if !url.trim().is_empty() => {}
            _ => return Err(NodeError::Config("URL is required".to_owned())),
        }
        match self.reader.method.as_deref() {
            Some(method) if !method.is_empty() => HttpMethod::parse(method),
            _ => Err(NodeError::Config("Method is required".to_owned())),
        }
    }

    pub fn follow_redirects(&self) -> bool {
        self.follow_redirect == FollowRedirect::Follow
    }
}
