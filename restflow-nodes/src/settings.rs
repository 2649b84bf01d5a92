// src/settings.rs

use std::env;
use std::time::Duration;

use derivative::Derivative;
use tracing::warn;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 100;
pub const DEFAULT_MAX_REDIRECTS: usize = 10;
pub const DEFAULT_API_URI: &str = "http://api-service.platform.svc.cluster.local:9000";

/// 进程级设置，来自环境变量 (支持 `.env`)。
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Settings {
    /// 每次 HTTP 调用的超时，由传输层负责。
    pub request_timeout: Duration,
    /// 跟随重定向时的最大跳数。
    pub max_redirects: usize,
    /// 平台 API 地址，附件存储从这里申请 signed URL。
    pub api_uri: String,
    pub api_username: Option<String>,
    #[derivative(Debug = "ignore")]
    pub api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            api_uri: DEFAULT_API_URI.to_string(),
            api_username: None,
            api_key: None,
        }
    }
}

impl Settings {
    /// 读取 `.env` (若存在) 和环境变量。无法解析的数字回退到默认值。
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let request_timeout = parse_or(&lookup, "REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS);
        let max_redirects = parse_or(&lookup, "MAX_REDIRECTS", DEFAULT_MAX_REDIRECTS);

        Self {
            request_timeout: Duration::from_secs(request_timeout),
            max_redirects,
            api_uri: lookup("ELASTICIO_API_URI").unwrap_or(defaults.api_uri),
            api_username: lookup("ELASTICIO_API_USERNAME"),
            api_key: lookup("ELASTICIO_API_KEY"),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{key}={raw} is not a valid number, using default");
            default
        }),
        None => default,
    }
}
