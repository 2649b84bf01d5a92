use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use restflow_jmes::{ExpressionEvaluator, JmesEvaluator};
use serde_json::json;
use tracing::{error, info, warn};

use crate::attachments::{AttachmentStore, SignedUrlAttachmentStore};
use crate::http::auth::{authorize, AuthSpec};
use crate::http::body::{build_body, BodyContext, BodySpec};
use crate::http::classifier::{classify, ErrorPolicy};
use crate::http::decoder::{decode, DecodeOptions};
use crate::http::executor::{build_client, execute};
use crate::http::http_params::HttpParams;
use crate::http::request::{handle_passthrough, resolve_target, RequestSpec};
use crate::http::result::{emit_rebound, emit_result};
use crate::message::{EmitEvent, Emitter, Message};
use crate::node_type::{NodeError, NodeExecutionContext, NodeOutput, NodeType};
use crate::settings::Settings;

/// HTTP 节点共享的外部服务。
#[derive(Clone)]
pub struct NodeServices {
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub attachments: Arc<dyn AttachmentStore>,
    pub settings: Settings,
}

impl NodeServices {
    pub fn new(
        evaluator: Arc<dyn ExpressionEvaluator>,
        attachments: Arc<dyn AttachmentStore>,
        settings: Settings,
    ) -> Self {
        Self {
            evaluator,
            attachments,
            settings,
        }
    }

    /// JMESPath 求值 + 平台附件存储，设置来自环境变量。
    pub fn from_env() -> Self {
        let settings = Settings::from_env();
        let attachments = SignedUrlAttachmentStore::new(Client::new(), &settings);
        Self::new(Arc::new(JmesEvaluator::new()), Arc::new(attachments), settings)
    }
}

/// HTTP action：处理上游消息，支持 pass-through。
pub struct HttpRequestAction {
    services: NodeServices,
}

impl HttpRequestAction {
    pub fn new(services: NodeServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl NodeType for HttpRequestAction {
    fn name(&self) -> &str {
        "httpRequestAction"
    }

    fn display_name(&self) -> &str {
        "HTTP request"
    }

    async fn execute(&self, ctx: &NodeExecutionContext) -> Result<NodeOutput, NodeError> {
        let mut message = ctx.message.clone();
        handle_passthrough(&mut message)?;
        process_method(ctx, message, &self.services)
            .await
            .map_err(|e| {
                error!(node = self.name(), error = %e, "HTTP request failed");
                e
            })
    }
}

/// HTTP trigger：每次轮询发一次请求，没有输入消息。
pub struct HttpRequestTrigger {
    services: NodeServices,
}

impl HttpRequestTrigger {
    pub fn new(services: NodeServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl NodeType for HttpRequestTrigger {
    fn name(&self) -> &str {
        "httpRequestTrigger"
    }

    fn display_name(&self) -> &str {
        "HTTP request trigger"
    }

    async fn execute(&self, ctx: &NodeExecutionContext) -> Result<NodeOutput, NodeError> {
        process_method(ctx, Message::empty(), &self.services)
            .await
            .map_err(|e| {
                error!(node = self.name(), error = %e, "HTTP poll failed");
                e
            })
    }
}

/// 请求管线：解析配置 -> 认证 -> 构建 body -> 发送 -> 状态分类 -> 解码 -> 输出。
pub async fn process_method(
    ctx: &NodeExecutionContext,
    message: Message,
    services: &NodeServices,
) -> Result<NodeOutput, NodeError> {
    let params = HttpParams::from_value(&ctx.parameters)?;
    let evaluator = services.evaluator.as_ref();
    let emitter = ctx.emitter.as_ref();

    let target = resolve_target(&params, &message.body, evaluator)?;
    let auth = AuthSpec::try_from(&params.auth)?;
    let follow_redirects = params.follow_redirects();
    let client = build_client(&services.settings, follow_redirects)?;

    let authorized = authorize(&auth, target.headers, &client, Utc::now()).await?;
    if let Some(refreshed) = &authorized.refreshed {
        info!("OAuth2 keys refreshed, emitting updateKeys");
        emitter.emit(EmitEvent::UpdateKeys(refreshed.to_value())).await?;
    }

    let mut headers = authorized.headers;
    let body_spec = params
        .reader
        .body
        .as_ref()
        .map(BodySpec::from_config)
        .unwrap_or(BodySpec::Raw(None));
    let body_ctx = BodyContext {
        context: &message.body,
        attachments: &message.attachments,
        evaluator,
        http: &client,
    };
    let body = build_body(&body_spec, target.method, &body_ctx, &mut headers).await?;

    let spec = RequestSpec {
        method: target.method,
        url: target.url,
        headers,
        body,
        follow_redirects,
    };
    let policy = ErrorPolicy {
        follow_redirects,
        dont_throw: params.dont_throw_error_flg,
        enable_rebound: params.enable_rebound,
    };

    let response = match execute(&client, &spec).await.and_then(|r| classify(r, policy)) {
        Ok(response) => response,
        Err(e) => return handle_failure(e, policy, emitter).await,
    };

    let mut outward = Message::empty().with_attachments(message.attachments.clone());
    let decoded = decode(
        &response,
        DecodeOptions::from(&params),
        services.attachments.as_ref(),
        &mut outward,
    )
    .await?;
    emit_result(decoded, outward, params.split_result, emitter).await
}

/// 发送或状态分类失败后的处理：可重投时 rebound，dont-throw 模式下把网络错误放进消息，否则报错。
async fn handle_failure(
    error: NodeError,
    policy: ErrorPolicy,
    emitter: &dyn Emitter,
) -> Result<NodeOutput, NodeError> {
    if policy.enable_rebound && error.is_reboundable() {
        warn!(error = %error, "rebounding message");
        return emit_rebound(&error, emitter).await;
    }
    match error {
        NodeError::Transport { code, message } if policy.dont_throw => {
            warn!(code, error = %message, "transport error reported in message");
            Ok(NodeOutput::Message(Message::with_body(json!({
                "errorCode": code,
                "errorMessage": message,
            }))))
        }
        other => Err(other),
    }
}
