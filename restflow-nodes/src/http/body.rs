//! body.rs
//!
//! 请求 body 的构建。编码方式由 body 配置里的 `contentType` 决定：
//! `multipart/form-data` -> FormData，`application/x-www-form-urlencoded` -> UrlEncoded，其他 -> Raw。

use std::collections::BTreeMap;

use restflow_jmes::ExpressionEvaluator;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::http::http_params::{BodyConfig, FormDataEntry, HttpMethod, KeyValue};
use crate::http::request::{value_to_text, Headers};
use crate::message::Attachment;
use crate::node_type::NodeError;

pub const FORM_DATA: &str = "multipart/form-data";
pub const URLENCODED: &str = "application/x-www-form-urlencoded";
pub const FORM_DATA_BOUNDARY: &str = "__X_ELASTICIO_BOUNDARY__";

pub fn form_data_content_type() -> String {
    format!("{FORM_DATA}; charset=utf8; boundary={FORM_DATA_BOUNDARY}")
}

/// body 的编码方式。
#[derive(Debug, Clone, PartialEq)]
pub enum BodySpec {
    /// 单个表达式；为 None 时不发送 body。
    Raw(Option<String>),
    FormData(Vec<FormDataEntry>),
    UrlEncoded(Vec<KeyValue>),
}

impl BodySpec {
    pub fn from_config(config: &BodyConfig) -> Self {
        match config.content_type.as_deref() {
            Some(FORM_DATA) => BodySpec::FormData(config.form_data.clone()),
            Some(URLENCODED) => BodySpec::UrlEncoded(config.urlencoded.clone()),
            _ => BodySpec::Raw(config.raw.clone().filter(|raw| !raw.is_empty())),
        }
    }
}

/// multipart 中的一段。
#[derive(Debug, Clone, PartialEq)]
pub struct FormPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub content: Vec<u8>,
}

/// 构建 body 所需的上下文。
pub struct BodyContext<'a> {
    pub context: &'a Value,
    /// 上游步骤留在消息上的附件，会追加为 form-data 字段。
    pub attachments: &'a BTreeMap<String, Attachment>,
    pub evaluator: &'a dyn ExpressionEvaluator,
    pub http: &'a Client,
}

/// 按 `spec` 编码 body。GET 请求不带 body。
///
/// FormData 会改写 `headers` 中的 content-type。
pub async fn build_body(
    spec: &BodySpec,
    method: HttpMethod,
    ctx: &BodyContext<'_>,
    headers: &mut Headers,
) -> Result<Option<Vec<u8>>, NodeError> {
    if method == HttpMethod::Get {
        return Ok(None);
    }

    match spec {
        BodySpec::Raw(None) => Ok(None),
        BodySpec::Raw(Some(expression)) => {
            let text = match ctx.evaluator.evaluate(expression, ctx.context)? {
                Value::String(s) => s,
                other => other.to_string(),
            };
            Ok(Some(text.into_bytes()))
        }
        BodySpec::UrlEncoded(pairs) => {
            if pairs.is_empty() {
                return Ok(None);
            }
            let mut encoded = Vec::with_capacity(pairs.len());
            for pair in pairs {
                let value = ctx.evaluator.evaluate(&pair.value, ctx.context)?;
                encoded.push(format!("{}={}", pair.key, value_to_text(&value)));
            }
            headers
                .entry("content-type".to_owned())
                .or_insert_with(|| URLENCODED.to_owned());
            Ok(Some(encoded.join("&").into_bytes()))
        }
        BodySpec::FormData(entries) => {
            headers.insert("content-type".to_owned(), form_data_content_type());
            let parts = collect_form_parts(entries, ctx).await?;
            Ok(Some(encode_multipart(&parts)))
        }
    }
}

/// 按声明顺序收集 form-data 字段，随后追加消息附件。文件逐个顺序下载。
async fn collect_form_parts(
    entries: &[FormDataEntry],
    ctx: &BodyContext<'_>,
) -> Result<Vec<FormPart>, NodeError> {
    let mut parts = Vec::with_capacity(entries.len() + ctx.attachments.len());

    for entry in entries {
        match &entry.filename {
            Some(filename) => match fetch(ctx.http, &entry.value).await {
                Ok(content) => parts.push(FormPart {
                    name: entry.key.clone(),
                    filename: Some(filename.clone()),
                    content_type: entry.content_type.clone(),
                    content,
                }),
                Err(e) => warn!(key = %entry.key, error = %e, "skipping form-data file part"),
            },
            None => {
                let value = ctx.evaluator.evaluate(&entry.value, ctx.context)?;
                parts.push(FormPart {
                    name: entry.key.clone(),
                    filename: None,
                    content_type: None,
                    content: value_to_text(&value).into_bytes(),
                });
            }
        }
    }

    for (name, attachment) in ctx.attachments {
        match fetch(ctx.http, &attachment.url).await {
            Ok(content) => parts.push(FormPart {
                name: name.clone(),
                filename: Some(name.clone()),
                content_type: attachment.content_type.clone(),
                content,
            }),
            Err(e) => warn!(attachment = %name, error = %e, "skipping attachment form-data part"),
        }
    }

    debug!(parts = parts.len(), "form-data parts collected");
    Ok(parts)
}

async fn fetch(http: &Client, url: &str) -> Result<Vec<u8>, reqwest::Error> {
    let response = http.get(url).send().await?.error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}

/// 使用固定 boundary 编码 multipart body。
pub fn encode_multipart(parts: &[FormPart]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(format!("--{FORM_DATA_BOUNDARY}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(filename) = &part.filename {
            disposition.push_str(&format!("; filename=\"{filename}\""));
        }
        out.extend_from_slice(disposition.as_bytes());
        out.extend_from_slice(b"\r\n");
        if let Some(content_type) = &part.content_type {
            out.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&part.content);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{FORM_DATA_BOUNDARY}--\r\n").as_bytes());
    out
}
