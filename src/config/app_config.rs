//! # 应用配置结构定义

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::channel::types::{CacheMode, CacheScope};

/// 应用主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 上游 HTTP 客户端配置
    #[serde(default)]
    pub http: HttpClientConfig,
    /// 渠道编译期默认值（会被每个实例的静态参数覆盖）
    #[serde(default)]
    pub channel: ChannelDefaults,
}

/// 上游 HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// 连接超时时间（秒）
    pub connect_timeout_secs: u64,
    /// 读取超时时间（秒），限制两次读取之间的最长等待，不限制整体传输时长
    pub read_timeout_secs: u64,
    /// 单次抓取允许跟随的最大重定向次数
    pub max_redirects: usize,
    /// 发往上游的 User-Agent
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            max_redirects: 10,
            user_agent: concat!("web-proxy/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpClientConfig {
    /// 连接超时
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// 读取超时
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// 渠道默认值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelDefaults {
    /// 默认缓存超时（秒）
    pub cache_default_timeout: u64,
    /// 默认缓存范围
    pub cache_default_scope: CacheScope,
    /// 默认缓存模式
    pub cache_default_mode: CacheMode,
    /// 默认身份属性放行列表（`*` 全部放行，`!*` 全部拒绝）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_allow: Option<String>,
}

impl Default for ChannelDefaults {
    fn default() -> Self {
        Self {
            cache_default_timeout: 300,
            cache_default_scope: CacheScope::Instance,
            cache_default_mode: CacheMode::None,
            person_allow: None,
        }
    }
}

impl AppConfig {
    /// 验证配置的有效性
    pub fn validate(&self) -> crate::error::Result<()> {
        crate::ensure_config!(
            self.http.connect_timeout_secs > 0,
            "http.connect_timeout_secs 必须大于0"
        );
        crate::ensure_config!(
            self.http.read_timeout_secs > 0,
            "http.read_timeout_secs 必须大于0"
        );
        crate::ensure_config!(
            self.http.max_redirects > 0,
            "http.max_redirects 必须大于0"
        );
        crate::ensure_config!(
            !self.http.user_agent.trim().is_empty(),
            "http.user_agent 不能为空"
        );
        Ok(())
    }
}
