//! attachments.rs
//!
//! 附件存储：把二进制内容上传到平台存储，并在消息上登记 `{url, size, content-type}`。

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::message::{Attachment, Message};
use crate::node_type::NodeError;
use crate::rest_client::{ClientAuth, RequestBody, RequestOptions, RestClient};
use crate::settings::Settings;

const SIGNED_URL_PATH: &str = "/v2/resources/storage/signed-url";

/// 附件存储服务。返回可下载的地址。
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn upload(&self, content: Bytes, content_type: Option<&str>) -> Result<String, NodeError>;
}

/// 上传附件并登记到 `message.attachments[name]`。
pub async fn add_attachment(
    store: &dyn AttachmentStore,
    message: &mut Message,
    name: &str,
    content: Bytes,
    content_type: Option<&str>,
) -> Result<(), NodeError> {
    let size = content.len() as u64;
    let url = store.upload(content, content_type).await?;
    info!(name, size, "attachment stored");
    message.attachments.insert(
        name.to_string(),
        Attachment {
            url,
            size: Some(size),
            content_type: content_type.map(str::to_string),
        },
    );
    Ok(())
}

/// 生成不会冲突的附件名：`<毫秒时间戳>_<uuid>[.<扩展名>]`。
pub fn generate_attachment_name(content_type: Option<&str>) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let base = format!("{millis}_{}", Uuid::new_v4());
    match content_type.and_then(extension_for) {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}

fn extension_for(content_type: &str) -> Option<String> {
    let mime: mime::Mime = content_type.parse().ok()?;
    let subtype = mime.subtype().as_str();
    let ext = match subtype {
        "octet-stream" => return None,
        "msword" => "doc",
        "vnd.ms-excel" => "xls",
        "jpeg" => "jpg",
        "plain" => "txt",
        s if s.len() <= 5 && s.chars().all(|c| c.is_ascii_alphanumeric()) => s,
        _ => return None,
    };
    Some(ext.to_string())
}

#[derive(Debug, Deserialize)]
struct SignedUrl {
    put_url: String,
    get_url: String,
}

/// 平台存储：先向平台 API 申请 signed URL，再把内容 PUT 上去。
#[derive(Debug, Clone)]
pub struct SignedUrlAttachmentStore {
    client: RestClient,
}

impl SignedUrlAttachmentStore {
    pub fn new(http: Client, settings: &Settings) -> Self {
        let auth = match (&settings.api_username, &settings.api_key) {
            (Some(username), Some(password)) => ClientAuth::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            _ => ClientAuth::NoAuth,
        };
        Self {
            client: RestClient::new(http, &settings.api_uri, auth),
        }
    }
}

#[async_trait]
impl AttachmentStore for SignedUrlAttachmentStore {
    async fn upload(&self, content: Bytes, content_type: Option<&str>) -> Result<String, NodeError> {
        let signed = self
            .client
            .make_request(RequestOptions::new(Method::POST, SIGNED_URL_PATH))
            .await
            .map_err(|e| NodeError::Attachment(e.to_string()))?;
        let signed: SignedUrl = serde_json::from_value(signed)
            .map_err(|e| NodeError::Attachment(format!("Unexpected signed-url response: {e}")))?;
        debug!("uploading attachment to signed url");

        let mut put = RequestOptions::new(Method::PUT, &signed.put_url)
            .absolute()
            .with_body(RequestBody::Bytes(content.to_vec()));
        if let Some(ct) = content_type {
            put = put.with_header("content-type", ct);
        }
        self.client
            .make_request(put)
            .await
            .map_err(|e| NodeError::Attachment(e.to_string()))?;
        Ok(signed.get_url)
    }
}

/// 内存附件存储，地址形如 `memory://<n>`。
#[derive(Debug, Default)]
pub struct MemoryAttachmentStore {
    items: Mutex<Vec<(Bytes, Option<String>)>>,
}

impl MemoryAttachmentStore {
    pub async fn uploads(&self) -> Vec<(Bytes, Option<String>)> {
        self.items.lock().await.clone()
    }
}

#[async_trait]
impl AttachmentStore for MemoryAttachmentStore {
    async fn upload(&self, content: Bytes, content_type: Option<&str>) -> Result<String, NodeError> {
        let mut items = self.items.lock().await;
        items.push((content, content_type.map(str::to_string)));
        Ok(format!("memory://{}", items.len() - 1))
    }
}
