//! decoder.rs
//!
//! 响应解码。按顺序匹配规则决定解码方式，手动指定的 `overrideContentType` 优先：
//!
//! 1. 空 body -> `{}`
//! 2. JSON (`application/json`、`+json`) -> 解析，失败报 ParseError
//! 3. XML (`*/xml`、`+xml`) -> 转成对象；`xmlToAttach` 时改存附件
//! 4. 图片、Word、Excel、PDF、CSV、octet-stream、binary -> 存附件，返回 `{}`
//! 5. `text/*` -> `{ result: <文本> }`
//! 6. 其它 (包括没有 content-type) -> 尽量按 JSON 解析，失败时原样返回文本

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::attachments::{add_attachment, generate_attachment_name, AttachmentStore};
use crate::http::executor::ResponseEnvelope;
use crate::http::http_params::{ContentTypeOverride, HttpParams};
use crate::http::xml::xml_to_json;
use crate::message::Message;
use crate::node_type::NodeError;

/// 解码方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Json,
    Xml,
    Attachment,
    Text,
    BestEffort,
}

const ATTACHMENT_MARKERS: [&str; 9] = [
    "msword",
    "wordprocessing",
    "excel",
    "spreadsheet",
    "pdf",
    "csv",
    "octet-stream",
    "binary",
    "zip",
];

impl Route {
    pub fn select(override_type: ContentTypeOverride, content_type: Option<&str>) -> Self {
        match override_type {
            ContentTypeOverride::ParseAsJson => return Route::Json,
            ContentTypeOverride::ParseAsXml => return Route::Xml,
            ContentTypeOverride::TreatAsText => return Route::Text,
            ContentTypeOverride::StoreAsAttachment => return Route::Attachment,
            ContentTypeOverride::Default => {}
        }
        let Some(mime) = content_type.and_then(|ct| ct.parse::<mime::Mime>().ok()) else {
            return Route::BestEffort;
        };
        let subtype = mime.subtype().as_str().to_ascii_lowercase();
        let suffix = mime.suffix().map(|s| s.as_str().to_ascii_lowercase());

        if subtype == "json" || suffix.as_deref() == Some("json") {
            Route::Json
        } else if subtype == "xml" || suffix.as_deref() == Some("xml") {
            Route::Xml
        } else if mime.type_() == mime::IMAGE
            || ATTACHMENT_MARKERS.iter().any(|marker| subtype.contains(marker))
        {
            Route::Attachment
        } else if mime.type_() == mime::TEXT {
            Route::Text
        } else {
            Route::BestEffort
        }
    }
}

/// 影响解码结果形状的配置。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeOptions {
    pub override_content_type: ContentTypeOverride,
    pub xml_to_attach: bool,
    pub dont_throw: bool,
    pub split_result: bool,
}

impl From<&HttpParams> for DecodeOptions {
    fn from(params: &HttpParams) -> Self {
        Self {
            override_content_type: params.override_content_type,
            xml_to_attach: params.xml_to_attach,
            dont_throw: params.dont_throw_error_flg,
            split_result: params.split_result,
        }
    }
}

/// 解码响应。存成附件的内容登记在 `outward.attachments` 上。
pub async fn decode(
    response: &ResponseEnvelope,
    options: DecodeOptions,
    store: &dyn AttachmentStore,
    outward: &mut Message,
) -> Result<Value, NodeError> {
    let decoded = decode_body(response, options, store, outward).await?;
    Ok(structure(response, decoded, options))
}

async fn decode_body(
    response: &ResponseEnvelope,
    options: DecodeOptions,
    store: &dyn AttachmentStore,
    outward: &mut Message,
) -> Result<Value, NodeError> {
    if response.body.is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    let content_type = response.content_type();
    let route = Route::select(options.override_content_type, content_type);
    info!(?route, content_type = content_type.unwrap_or(""), "decoding response");

    match route {
        Route::Json => serde_json::from_slice(&response.body)
            .map_err(|e| NodeError::Parse(format!("JSON parse error: {e}"))),
        Route::Xml if options.xml_to_attach => {
            store_attachment(response, store, outward).await?;
            Ok(json!({ "success": true }))
        }
        Route::Xml => xml_to_json(&String::from_utf8_lossy(&response.body)),
        Route::Attachment => {
            store_attachment(response, store, outward).await?;
            Ok(Value::Object(Map::new()))
        }
        Route::Text => Ok(json!({ "result": String::from_utf8_lossy(&response.body) })),
        Route::BestEffort => Ok(serde_json::from_slice(&response.body).unwrap_or_else(|e| {
            debug!(error = %e, "response is not JSON, keeping raw text");
            Value::String(String::from_utf8_lossy(&response.body).into_owned())
        })),
    }
}

async fn store_attachment(
    response: &ResponseEnvelope,
    store: &dyn AttachmentStore,
    outward: &mut Message,
) -> Result<(), NodeError> {
    let content_type = response.content_type();
    let name = generate_attachment_name(content_type);
    add_attachment(store, outward, &name, response.body.clone(), content_type).await
}

/// 最终形状：dont-throw 模式包成 `{headers, body, statusCode, statusMessage}`；
/// 否则非对象包成 `{result}`，split 模式下数组保持原样。
pub fn structure(response: &ResponseEnvelope, decoded: Value, options: DecodeOptions) -> Value {
    if options.dont_throw {
        let headers: Map<String, Value> = response
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        return json!({
            "headers": headers,
            "body": decoded,
            "statusCode": response.status,
            "statusMessage": response.status_message,
        });
    }
    match decoded {
        Value::Object(_) => decoded,
        Value::Array(_) if options.split_result => decoded,
        other => json!({ "result": other }),
    }
}
