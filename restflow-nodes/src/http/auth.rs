//! auth.rs
//!
//! 认证策略：No Auth / Basic / API Key / OAuth2。
//!
//! 配置中的 `auth` 对象先解析成封闭的 [`AuthSpec`]，再由 [`authorize`] 产出要注入的 header。
//! OAuth2 的 token 过期时会刷新，并把刷新后的 spec 作为返回值交给调用方持久化；
//! 这里不会修改调用方持有的任何对象。

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use derivative::Derivative;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::http::request::Headers;
use crate::node_type::NodeError;

/// 标记 "凭证 header" 的 `_type`，认证策略注入前会先删掉这类 header。
pub const CREDS_HEADER_TYPE: &str = "CREDS_HEADER_TYPE";

pub const NO_AUTH: &str = "No Auth";
pub const BASIC_AUTH: &str = "Basic Auth";
pub const API_KEY_AUTH: &str = "API Key Auth";
pub const OAUTH2_AUTH: &str = "OAuth2";

#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize, Derivative)]
#[derivative(Debug)]
pub struct BasicCredentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    #[derivative(Debug = "ignore")]
    pub password: String,
}

#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize, Derivative)]
#[derivative(Debug)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyCredentials {
    #[serde(default)]
    pub header_name: String,
    #[serde(default)]
    #[derivative(Debug = "ignore")]
    pub header_value: String,
}

/// OAuth2 中会被刷新改写的部分。未知字段原样保留。
#[derive(Clone, PartialEq, Default, Serialize, Deserialize, Derivative)]
#[derivative(Debug)]
pub struct OAuth2Keys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[derivative(Debug = "ignore")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[derivative(Debug = "ignore")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(
        default,
        rename = "tokenExpiryTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub token_expiry_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    #[derivative(Debug = "ignore")]
    pub extra: Map<String, Value>,
}

impl OAuth2Keys {
    /// access_token 存在，且没有过期时间或尚未过期。
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.access_token.is_some() && self.token_expiry_time.map_or(true, |expiry| now < expiry)
    }
}

#[derive(Clone, PartialEq, Default, Serialize, Deserialize, Derivative)]
#[derivative(Debug)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2Config {
    #[serde(default)]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    #[derivative(Debug = "ignore")]
    pub client_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default)]
    pub keys: OAuth2Keys,
}

/// 配置中的 `auth` 对象。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic: Option<BasicCredentials>,
    #[serde(rename = "apiKey", default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ApiKeyCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth2: Option<OAuth2Config>,
}

/// 解析后的认证策略。
#[derive(Debug, Clone, PartialEq)]
pub enum AuthSpec {
    NoAuth,
    Basic(BasicCredentials),
    ApiKey(ApiKeyCredentials),
    OAuth2(OAuth2Config),
}

impl TryFrom<&AuthConfig> for AuthSpec {
    type Error = NodeError;

    fn try_from(config: &AuthConfig) -> Result<Self, Self::Error> {
        match config.auth_type.as_deref() {
            None | Some("") | Some(NO_AUTH) => Ok(AuthSpec::NoAuth),
            Some(BASIC_AUTH) => config
                .basic
                .clone()
                .map(AuthSpec::Basic)
                .ok_or_else(|| NodeError::Config("Basic Auth requires `auth.basic`".to_owned())),
            Some(API_KEY_AUTH) => {
                let api_key = config.api_key.clone().ok_or_else(|| {
                    NodeError::Config("API Key Auth requires `auth.apiKey`".to_owned())
                })?;
                if api_key.header_name.trim().is_empty() {
                    return Err(NodeError::Config(
                        "API Key Auth requires a header name".to_owned(),
                    ));
                }
                Ok(AuthSpec::ApiKey(api_key))
            }
            Some(OAUTH2_AUTH) => {
                let oauth2 = config.oauth2.clone().ok_or_else(|| {
                    NodeError::Config("OAuth2 requires `auth.oauth2`".to_owned())
                })?;
                if oauth2.token_uri.trim().is_empty() {
                    return Err(NodeError::Config("OAuth2 requires a token URI".to_owned()));
                }
                Ok(AuthSpec::OAuth2(oauth2))
            }
            Some(other) => Err(NodeError::Config(format!(
                "Auth type \"{other}\" isn't one of the: {NO_AUTH},{BASIC_AUTH},{API_KEY_AUTH},{OAUTH2_AUTH}."
            ))),
        }
    }
}

impl AuthSpec {
    /// 转回配置形态，用于 `updateKeys` 持久化。
    pub fn to_config(&self) -> AuthConfig {
        let mut config = AuthConfig::default();
        match self {
            AuthSpec::NoAuth => config.auth_type = Some(NO_AUTH.to_owned()),
            AuthSpec::Basic(basic) => {
                config.auth_type = Some(BASIC_AUTH.to_owned());
                config.basic = Some(basic.clone());
            }
            AuthSpec::ApiKey(api_key) => {
                config.auth_type = Some(API_KEY_AUTH.to_owned());
                config.api_key = Some(api_key.clone());
            }
            AuthSpec::OAuth2(oauth2) => {
                config.auth_type = Some(OAUTH2_AUTH.to_owned());
                config.oauth2 = Some(oauth2.clone());
            }
        }
        config
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self.to_config()).unwrap_or(Value::Null)
    }
}

/// 认证结果：要注入的 header，以及 (若刷新过) 新的认证配置。
#[derive(Debug, Clone, PartialEq)]
pub struct Authorized {
    pub headers: Headers,
    pub refreshed: Option<AuthSpec>,
}

/// 把认证 header 写入 `headers`。同名 header 会被覆盖。
///
/// 只有 OAuth2 在 token 不新鲜时会发起网络请求。
pub async fn authorize(
    spec: &AuthSpec,
    mut headers: Headers,
    http: &Client,
    now: DateTime<Utc>,
) -> Result<Authorized, NodeError> {
    let refreshed = match spec {
        AuthSpec::NoAuth => None,
        AuthSpec::Basic(basic) => {
            let encoded = general_purpose::STANDARD
                .encode(format!("{}:{}", basic.username, basic.password));
            headers.insert("authorization".to_owned(), format!("Basic {encoded}"));
            None
        }
        AuthSpec::ApiKey(api_key) => {
            headers.insert(
                api_key.header_name.to_lowercase(),
                api_key.header_value.clone(),
            );
            None
        }
        AuthSpec::OAuth2(oauth2) => {
            let (config, refreshed) = if oauth2.keys.is_fresh(now) {
                debug!("reusing OAuth2 access token");
                (oauth2.clone(), None)
            } else {
                let config = refresh_token(http, oauth2, now).await?;
                (config.clone(), Some(AuthSpec::OAuth2(config)))
            };
            if let Some(token) = &config.keys.access_token {
                headers.insert("authorization".to_owned(), format!("Bearer {token}"));
            }
            refreshed
        }
    };
    Ok(Authorized { headers, refreshed })
}

/// `grant_type=refresh_token` 刷新 access token。
pub async fn refresh_token(
    http: &Client,
    config: &OAuth2Config,
    now: DateTime<Utc>,
) -> Result<OAuth2Config, NodeError> {
    let refresh_token = config.keys.refresh_token.as_deref().ok_or_else(|| {
        NodeError::Auth("Error in authentication. No refresh_token stored for OAuth2 credentials".to_owned())
    })?;
    info!(token_uri = %config.token_uri, "refreshing OAuth2 access token");

    let mut form: Vec<(&str, &str)> = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
    ];
    if let Some(scope) = config.scope.as_deref() {
        form.push(("scope", scope));
    }

    let response = http
        .post(&config.token_uri)
        .form(&form)
        .send()
        .await
        .map_err(|e| NodeError::Auth(format!("Error in authentication. {e}")))?;
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| NodeError::Auth(format!("Error in authentication. {e}")))?;

    if !status.is_success() {
        warn!(status = status.as_u16(), "OAuth2 refresh rejected");
        return Err(NodeError::Auth(format!(
            "Error in authentication. Status code: {}, Body: {}",
            status.as_u16(),
            text
        )));
    }

    let mut body: Map<String, Value> = serde_json::from_str(&text).map_err(|e| {
        NodeError::Auth(format!("Error in authentication. Invalid token response: {e}"))
    })?;

    let access_token = take_string(&mut body, "access_token").ok_or_else(|| {
        NodeError::Auth("Error in authentication. Token response has no access_token".to_owned())
    })?;
    let new_refresh_token = take_string(&mut body, "refresh_token").ok_or_else(|| {
        NodeError::Auth(
            "Error in authentication. Token response has no refresh_token, \
             the provider may require access_type=offline"
                .to_owned(),
        )
    })?;
    let expires_in = body.remove("expires_in").and_then(|v| match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    });

    let token_expiry_time = match expires_in {
        Some(secs) => Some(expiry_after(now, secs).ok_or_else(|| {
            NodeError::Auth(format!("Error in authentication. Invalid expires_in: {secs}"))
        })?),
        None => config.keys.token_expiry_time,
    };

    let mut refreshed = config.clone();
    let mut extra = refreshed.keys.extra.clone();
    extra.extend(body);
    refreshed.keys = OAuth2Keys {
        access_token: Some(access_token),
        refresh_token: Some(new_refresh_token),
        expires_in: expires_in.or(config.keys.expires_in),
        token_expiry_time,
        extra,
    };
    Ok(refreshed)
}

/// `now + secs` 秒。超出 chrono 可表示范围时为 None。
fn expiry_after(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?;
    now.checked_add_signed(Duration::try_seconds(secs)?)
}

fn take_string(body: &mut Map<String, Value>, key: &str) -> Option<String> {
    match body.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}
