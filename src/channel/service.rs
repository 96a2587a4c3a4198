//! # 渠道门面
//!
//! 面向门户框架的入口：静态数据、运行时数据、导航事件、渲染、缓存判定和下载。
//! 所有入口对未建立的会话都软降级：记录日志后返回空结果，而不是报错中断。

use reqwest::header::HeaderMap;
use std::sync::Arc;

use crate::channel::cache::{
    CacheKeyEngine, CacheValidity, ChannelCacheKey, StaticStylesheetResolver, StylesheetResolver,
};
use crate::channel::context::ConnectionContextRegistry;
use crate::channel::download::{self, ByteStream, DOWNLOAD_NAME};
use crate::channel::fetch::FetchEngine;
use crate::channel::params::{self, ChannelRequest, RequestParams};
use crate::channel::registry::{SessionHandle, SessionRegistry};
use crate::channel::render::{self, DefaultMediaResolver, MarkupNormalizer, MediaResolver, RenderPayload};
use crate::channel::resolver::{ChannelEvent, ParameterResolver};
use crate::channel::session::ChannelSession;
use crate::channel::types::Identity;
use crate::config::{AppConfig, ChannelDefaults};
use crate::error::{ProxyError, Result};
use crate::linfo;
use crate::logging::{LogComponent, LogStage};

/// 渠道运行时属性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeProperties {
    /// 本次是否会输出内容
    pub will_render: bool,
}

/// 内容代理渠道，一个实例服务所有会话
pub struct WebProxyChannel {
    registry: SessionRegistry,
    fetch: FetchEngine,
    cache: CacheKeyEngine,
    contexts: ConnectionContextRegistry,
    media: Arc<dyn MediaResolver>,
    defaults: ChannelDefaults,
}

impl std::fmt::Debug for WebProxyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebProxyChannel")
            .field("sessions", &self.registry.len())
            .field("contexts", &self.contexts)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl WebProxyChannel {
    /// 按应用配置创建渠道
    pub fn new(config: &AppConfig) -> Result<Self> {
        let fetch = FetchEngine::new(config.http.clone())?;
        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Channel,
            "channel_created",
            "内容代理渠道创建完成",
            max_redirects = config.http.max_redirects,
            cache_default_scope = %config.channel.cache_default_scope,
            cache_default_mode = %config.channel.cache_default_mode
        );
        Ok(Self {
            registry: SessionRegistry::new(),
            fetch,
            cache: CacheKeyEngine::new(Arc::new(StaticStylesheetResolver::new())),
            contexts: ConnectionContextRegistry::new(),
            media: Arc::new(DefaultMediaResolver),
            defaults: config.channel.clone(),
        })
    }

    /// 替换样式表列表查询
    #[must_use]
    pub fn with_stylesheet_resolver(mut self, resolver: Arc<dyn StylesheetResolver>) -> Self {
        self.cache = CacheKeyEngine::new(resolver);
        self
    }

    /// 替换本地连接上下文注册表
    #[must_use]
    pub fn with_context_registry(mut self, contexts: ConnectionContextRegistry) -> Self {
        self.contexts = contexts;
        self
    }

    /// 替换 MIME 类型解析
    #[must_use]
    pub fn with_media_resolver(mut self, media: Arc<dyn MediaResolver>) -> Self {
        self.media = media;
        self
    }

    /// 会话注册表
    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// 建立会话
    pub fn set_static_data(&self, uid: &str, identity: Identity, static_params: RequestParams) {
        let mut session = ChannelSession::from_static(uid, identity, static_params, &self.defaults);

        let selector = session
            .static_params
            .get(params::LOCAL_CONN_CONTEXT)
            .map(str::to_string);
        if let Some(selector) = selector {
            if let Some(context) = self
                .contexts
                .instantiate(uid, &selector, &session.static_params)
            {
                session.set_local_context(context);
            }
        }

        self.registry.open(session);
    }

    /// 合并一次请求的运行时数据
    pub async fn set_runtime_data(&self, uid: &str, request: ChannelRequest) {
        let Some(handle) = self.registry.get(uid, "set_runtime_data") else {
            return;
        };
        let mut session = handle.session().lock().await;
        ParameterResolver::resolve(&mut session, request);
    }

    /// 处理导航事件；`SessionDone` 移除会话并取消进行中的抓取
    pub async fn receive_event(&self, uid: &str, event: ChannelEvent) {
        let Some(handle) = self.registry.get(uid, "receive_event") else {
            return;
        };
        if event == ChannelEvent::SessionDone {
            // 先取消再等锁，避免等待进行中的抓取
            self.registry.close(uid);
            return;
        }
        let mut session = handle.session().lock().await;
        ParameterResolver::apply_event(&mut session, event);
    }

    /// 运行时属性；会话不存在时不渲染
    #[must_use]
    pub fn runtime_properties(&self, uid: &str) -> RuntimeProperties {
        RuntimeProperties {
            will_render: self.registry.get(uid, "runtime_properties").is_some(),
        }
    }

    /// 抓取并组装渲染输入；会话不存在时返回 `None`
    pub async fn render(
        &self,
        uid: &str,
        normalizer: &dyn MarkupNormalizer,
    ) -> Result<Option<RenderPayload>> {
        let Some(handle) = self.registry.get(uid, "render") else {
            return Ok(None);
        };
        let mut session = handle.session().lock().await;
        render::render(
            &self.fetch,
            &mut session,
            handle.cancel_token(),
            normalizer,
            self.media.as_ref(),
        )
        .await
        .map(Some)
    }

    /// 生成缓存键；会话不存在或不缓存时返回 `None`
    pub async fn generate_key(&self, uid: &str) -> Option<ChannelCacheKey> {
        let handle = self.registry.get(uid, "generate_key")?;
        let session = handle.session().lock().await;
        self.cache.make_key(&session).await
    }

    /// 缓存条目是否仍然有效；会话不存在时视为失效
    pub async fn is_cache_valid(&self, uid: &str, validity: &CacheValidity) -> bool {
        let Some(handle) = self.registry.get(uid, "is_cache_valid") else {
            return false;
        };
        let session = handle.session().lock().await;
        CacheKeyEngine::is_valid(&session, validity)
    }

    /// 下载连接的内容类型
    pub async fn content_type(&self, uid: &str) -> Option<String> {
        let handle = self.registry.get(uid, "content_type")?;
        let session = handle.session().lock().await;
        download::content_type(&session)
    }

    /// 抓取下载资源并返回响应头；会话不存在时返回空响应头
    pub async fn download_headers(&self, uid: &str) -> Result<HeaderMap> {
        let Some(handle) = self.registry.get(uid, "download_headers") else {
            return Ok(HeaderMap::new());
        };
        let mut session = handle.session().lock().await;
        download::download_headers(&self.fetch, &mut session, handle.cancel_token()).await
    }

    /// 取走下载字节流
    pub async fn open_stream(&self, uid: &str) -> Result<ByteStream> {
        let handle = self.session_or_missing(uid, "open_stream")?;
        let mut session = handle.session().lock().await;
        download::open_stream(&self.fetch, &mut session)
    }

    /// 下载文件名
    #[must_use]
    pub const fn download_name(&self, _uid: &str) -> &'static str {
        DOWNLOAD_NAME
    }

    /// 不支持，调用方应使用 [`Self::open_stream`]
    pub async fn download_data(&self, uid: &str) -> Result<()> {
        let handle = self.session_or_missing(uid, "download_data")?;
        let session = handle.session().lock().await;
        download::download_data(&session)
    }

    fn session_or_missing(&self, uid: &str, operation: &str) -> Result<SessionHandle> {
        self.registry
            .get(uid, operation)
            .ok_or_else(|| ProxyError::missing_session(uid))
    }
}
