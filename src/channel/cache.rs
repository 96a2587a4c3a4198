//! # 缓存键与有效性
//!
//! 只负责"是否需要抓取"的判定：从生效配置派生缓存键，并用创建时间戳判断旧条目是否过期。
//! 缓存内容本身的存储不在这里。

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::channel::session::ChannelSession;
use crate::channel::types::{CacheMode, CacheScope};
use crate::error::{FailureKind, ProxyError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lwarn};

/// 共享范围缓存键的系统前缀
pub const SYSTEM_CACHE_ID: &str = "web-proxy";

/// 缓存有效性令牌
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheValidity {
    /// 创建时间（毫秒时间戳）
    Timestamp(i64),
    /// 其他来源的令牌，一律视为失效
    Opaque(String),
}

impl CacheValidity {
    /// 以当前时间创建令牌
    #[must_use]
    pub fn now() -> Self {
        Self::Timestamp(Utc::now().timestamp_millis())
    }

    /// 令牌在给定超时（秒）下是否仍然有效
    #[must_use]
    pub fn is_valid(&self, timeout_secs: u64) -> bool {
        self.is_valid_at(timeout_secs, Utc::now().timestamp_millis())
    }

    /// 以指定的当前时间（毫秒）判定，边界为严格小于
    #[must_use]
    pub fn is_valid_at(&self, timeout_secs: u64, now_millis: i64) -> bool {
        match self {
            Self::Timestamp(created) => {
                let timeout_millis = i64::try_from(timeout_secs)
                    .unwrap_or(i64::MAX)
                    .saturating_mul(1000);
                now_millis.saturating_sub(*created) < timeout_millis
            }
            Self::Opaque(_) => false,
        }
    }
}

/// 渠道缓存键
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCacheKey {
    /// 生效的缓存范围
    pub scope: CacheScope,
    /// 键文本
    pub key: String,
    /// 创建时绑定的有效性令牌
    pub validity: CacheValidity,
}

impl ChannelCacheKey {
    /// 是否为跨实例共享的键（`user`/`system`）
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.scope != CacheScope::Instance
    }
}

impl fmt::Display for ChannelCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scope, self.key)
    }
}

/// 样式表列表查询
#[async_trait]
pub trait StylesheetResolver: Send + Sync {
    /// 根据样式表列表 URI 与浏览器信息选出样式表 URI
    async fn stylesheet_uri(&self, ssl_uri: &str, browser_info: Option<&str>) -> Result<String>;
}

/// 基于内存映射的样式表查询
#[derive(Debug, Clone, Default)]
pub struct StaticStylesheetResolver {
    stylesheets: HashMap<String, String>,
}

impl StaticStylesheetResolver {
    /// 空映射，所有查询都会失败
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记样式表列表对应的样式表
    #[must_use]
    pub fn with_stylesheet(mut self, ssl_uri: impl Into<String>, xsl_uri: impl Into<String>) -> Self {
        self.stylesheets.insert(ssl_uri.into(), xsl_uri.into());
        self
    }
}

#[async_trait]
impl StylesheetResolver for StaticStylesheetResolver {
    async fn stylesheet_uri(&self, ssl_uri: &str, _browser_info: Option<&str>) -> Result<String> {
        self.stylesheets
            .get(ssl_uri)
            .cloned()
            .ok_or_else(|| ProxyError::config(format!("样式表列表中没有可用的样式表: {ssl_uri}")))
    }
}

/// 缓存键引擎
#[derive(Clone)]
pub struct CacheKeyEngine {
    stylesheets: Arc<dyn StylesheetResolver>,
}

impl fmt::Debug for CacheKeyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheKeyEngine").finish_non_exhaustive()
    }
}

impl CacheKeyEngine {
    /// 使用给定的样式表查询
    #[must_use]
    pub fn new(stylesheets: Arc<dyn StylesheetResolver>) -> Self {
        Self { stylesheets }
    }

    /// 派生缓存键；缓存模式为 `none` 时返回 `None`
    pub async fn make_key(&self, session: &ChannelSession) -> Option<ChannelCacheKey> {
        if session.cache.mode() == CacheMode::None {
            ldebug!(
                session.uid,
                LogStage::CacheDecision,
                LogComponent::Cache,
                "cache_disabled",
                "缓存模式为 none，不生成缓存键"
            );
            return None;
        }

        let scope = session.cache.scope();
        let mut key = String::with_capacity(256);
        match scope {
            CacheScope::Instance => {}
            CacheScope::User => {
                key.push_str(&format!("{SYSTEM_CACHE_ID}: scope:{scope}, userId:{}, ", session.identity.id));
            }
            CacheScope::System => key.push_str(&format!("{SYSTEM_CACHE_ID}: scope:{scope}, ")),
        }

        let xsl_uri = self.stylesheet_identity(session).await;
        key.push_str(&format!(
            "sslUri:{}, xslUri:{xsl_uri}, fullxmlUri:{}, passThrough:{}, tidy:{}",
            session.ssl_uri.as_deref().unwrap_or_default(),
            session.full_xml_uri.as_deref().unwrap_or_default(),
            session.pass_through_mode(),
            if session.tidy_enabled() { "on" } else { "off" },
        ));

        let cache_key = ChannelCacheKey {
            scope,
            key,
            validity: CacheValidity::now(),
        };
        ldebug!(
            session.uid,
            LogStage::CacheDecision,
            LogComponent::Cache,
            "cache_key_generated",
            "缓存键生成完成",
            scope = %cache_key.scope,
            key = %cache_key.key
        );
        Some(cache_key)
    }

    /// 判断令牌在会话当前的生效超时下是否有效
    #[must_use]
    pub fn is_valid(session: &ChannelSession, validity: &CacheValidity) -> bool {
        let valid = validity.is_valid(session.cache.timeout());
        ldebug!(
            session.uid,
            LogStage::CacheDecision,
            LogComponent::Cache,
            "cache_validity_checked",
            "缓存有效性判定",
            valid = valid,
            timeout_secs = session.cache.timeout()
        );
        valid
    }

    /// 显式样式表优先；否则查询样式表列表，失败时把错误描述写进键
    async fn stylesheet_identity(&self, session: &ChannelSession) -> String {
        if let Some(xsl_uri) = &session.xsl_uri {
            return xsl_uri.clone();
        }

        let lookup = match session.ssl_uri.as_deref() {
            Some(ssl_uri) => {
                self.stylesheets
                    .stylesheet_uri(ssl_uri, session.runtime.browser_info.as_deref())
                    .await
            }
            None => Err(ProxyError::config("未配置样式表列表 URI")),
        };

        lookup.unwrap_or_else(|e| {
            lwarn!(
                session.uid,
                LogStage::CacheDecision,
                LogComponent::Cache,
                "stylesheet_lookup_failed",
                "样式表查询失败，缓存键将包含错误描述",
                kind = FailureKind::TransformFailure.as_str(),
                error = %e
            );
            format!("Not attainable: {e}")
        })
    }
}
