//! request.rs
//!
//! 请求解析：校验配置、处理 pass-through、对 URL 和 header 模板求值，得到 [`RequestSpec`]。

use std::collections::BTreeMap;

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Url;
use restflow_jmes::ExpressionEvaluator;
use serde_json::{Map, Value};
use tracing::debug;

use crate::http::auth::CREDS_HEADER_TYPE;
use crate::http::http_params::{HttpMethod, HttpParams};
use crate::message::Message;
use crate::node_type::NodeError;

/// 小写 header 名 -> 值。同名 header 后写入者覆盖先写入者。
pub type Headers = BTreeMap<String, String>;

/// pass-through 数据合并到消息 body 中使用的保留字段。
pub const PASSTHROUGH_BODY_PROPERTY: &str = "elasticio";

/// 准备发送的请求。交给执行器之后不再修改。
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
    pub follow_redirects: bool,
}

/// 把 `message.passthrough` 合并到 `body.elasticio`。
pub fn handle_passthrough(message: &mut Message) -> Result<(), NodeError> {
    let Some(passthrough) = message.passthrough.clone() else {
        return Ok(());
    };
    if message.body.is_null() {
        message.body = Value::Object(Map::new());
    }
    let Some(body) = message.body.as_object_mut() else {
        return Err(NodeError::Config(
            "Message body must be an object when using passthrough functionality".to_owned(),
        ));
    };
    if body.contains_key(PASSTHROUGH_BODY_PROPERTY) {
        return Err(NodeError::Config(format!(
            "{PASSTHROUGH_BODY_PROPERTY} property is reserved if you are using passthrough functionality"
        )));
    }
    let merged = match passthrough {
        Value::Object(map) => Value::Object(map),
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    body.insert(PASSTHROUGH_BODY_PROPERTY.to_owned(), merged);
    Ok(())
}

/// 求值结果转成文本：字符串原样，null 为空串，其它值序列化为 JSON。
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// URL、method 和用户配置的 header (已求值、已去掉凭证 header)。
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
}

pub fn resolve_target(
    params: &HttpParams,
    context: &Value,
    evaluator: &dyn ExpressionEvaluator,
) -> Result<ResolvedTarget, NodeError> {
    let method = params.validate()?;
    let template = params.reader.url.as_deref().unwrap_or_default();

    let url = value_to_text(&evaluator.evaluate(template, context)?);
    let url = url.trim();
    if url.is_empty() {
        return Err(NodeError::Config("URL is required".to_owned()));
    }
    check_url(url)?;

    let mut headers = Headers::new();
    for header in &params.reader.headers {
        if header.header_type.as_deref() == Some(CREDS_HEADER_TYPE) {
            continue;
        }
        if header.key.is_empty() || header.value.is_empty() {
            continue;
        }
        let name = header.key.to_lowercase();
        let value = value_to_text(&evaluator.evaluate(&header.value, context)?);
        check_header(&name, &value)?;
        headers.insert(name, value);
    }

    debug!(
        method = method.as_str(),
        url = %url,
        headers = ?headers.keys().collect::<Vec<_>>(),
        "resolved request target"
    );
    Ok(ResolvedTarget {
        method,
        url: url.to_string(),
        headers,
    })
}

/// 只接受绝对的 http/https 地址。
fn check_url(url: &str) -> Result<(), NodeError> {
    let parsed = Url::parse(url).map_err(|e| NodeError::Config(format!("Invalid URL \"{url}\": {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(NodeError::Config(format!(
            "Invalid URL \"{url}\": unsupported scheme \"{other}\""
        ))),
    }
}

fn check_header(name: &str, value: &str) -> Result<(), NodeError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| NodeError::Config(format!("Invalid header name \"{name}\"")))?;
    HeaderValue::from_str(value)
        .map_err(|_| NodeError::Config(format!("Invalid value for header \"{name}\"")))?;
    Ok(())
}
