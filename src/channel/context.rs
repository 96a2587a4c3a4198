//! # 本地连接上下文
//!
//! 会话创建时按 `upc_localConnContext` 选择器实例化的钩子：
//! 抓取前改写资源 URI，发送前向上游请求追加数据（认证头、票据等）。

use reqwest::header::HeaderMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::channel::params::{ChannelRequest, HttpMethod, RequestParams};
use crate::error::{FailureKind, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{lerror, linfo};

/// 即将发往上游的请求，发送前可被上下文修改
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    /// 请求方法
    pub method: HttpMethod,
    /// 目标地址
    pub url: Url,
    /// 请求头
    pub headers: HeaderMap,
    /// 请求体
    pub body: Option<String>,
}

impl OutgoingRequest {
    /// 不带请求头与请求体的 GET 请求
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// 本地连接上下文钩子
pub trait LocalConnectionContext: Send + Sync {
    /// 上下文名称，用于日志
    fn name(&self) -> &str;

    /// 抓取前改写资源 URI
    fn rewrite(&self, uri: &str, _request: &ChannelRequest) -> String {
        uri.to_string()
    }

    /// 发送前修改上游请求；返回错误只记录日志，不中断抓取
    fn augment(&self, _request: &ChannelRequest, _outgoing: &mut OutgoingRequest) -> Result<()> {
        Ok(())
    }
}

/// 根据实例静态参数构造上下文
pub type ContextFactory =
    Arc<dyn Fn(&RequestParams) -> Result<Arc<dyn LocalConnectionContext>> + Send + Sync>;

/// 选择器到上下文工厂的映射
#[derive(Clone, Default)]
pub struct ConnectionContextRegistry {
    factories: HashMap<String, ContextFactory>,
}

impl fmt::Debug for ConnectionContextRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut selectors: Vec<&String> = self.factories.keys().collect();
        selectors.sort();
        f.debug_struct("ConnectionContextRegistry")
            .field("selectors", &selectors)
            .finish()
    }
}

impl ConnectionContextRegistry {
    /// 空注册表
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个选择器
    pub fn register<F>(&mut self, selector: impl Into<String>, factory: F)
    where
        F: Fn(&RequestParams) -> Result<Arc<dyn LocalConnectionContext>> + Send + Sync + 'static,
    {
        self.factories.insert(selector.into(), Arc::new(factory));
    }

    /// 是否注册了该选择器
    #[must_use]
    pub fn contains(&self, selector: &str) -> bool {
        self.factories.contains_key(selector)
    }

    /// 实例化上下文；未知选择器或初始化失败时记录错误并返回 `None`
    #[must_use]
    pub fn instantiate(
        &self,
        uid: &str,
        selector: &str,
        static_params: &RequestParams,
    ) -> Option<Arc<dyn LocalConnectionContext>> {
        let Some(factory) = self.factories.get(selector) else {
            lerror!(
                uid,
                LogStage::SessionOpen,
                LogComponent::ConnContext,
                "unknown_context_selector",
                "未知的本地连接上下文选择器，会话将不带上下文继续",
                kind = FailureKind::ConfigurationDenied.as_str(),
                selector = selector
            );
            return None;
        };

        match factory(static_params) {
            Ok(context) => {
                linfo!(
                    uid,
                    LogStage::SessionOpen,
                    LogComponent::ConnContext,
                    "context_initialized",
                    "本地连接上下文初始化完成",
                    selector = selector,
                    context = context.name()
                );
                Some(context)
            }
            Err(e) => {
                lerror!(
                    uid,
                    LogStage::SessionOpen,
                    LogComponent::ConnContext,
                    "context_init_failed",
                    "本地连接上下文初始化失败，会话将不带上下文继续",
                    kind = e.kind().as_str(),
                    selector = selector,
                    error = %e
                );
                None
            }
        }
    }
}
