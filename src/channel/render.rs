//! # 渲染数据
//!
//! 为外部转换管线准备输入：抓取到的文档（可选 tidy 规范化）、样式表选择、
//! 参数快照，以及给 URL 改写组件使用的基础 URI 与 MIME 类型。

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use crate::channel::fetch::FetchEngine;
use crate::channel::params;
use crate::channel::session::ChannelSession;
use crate::error::{ProxyError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lerror};

/// 渲染失败时给终端用户的提示
pub const RENDER_FAILURE_MESSAGE: &str =
    "Problem occurred while rendering channel. Please restart channel.";
/// tidy 规范化失败的提示
pub const NORMALIZE_FAILURE_MESSAGE: &str = "Unable to convert input document to XHTML";
/// 基础动作 URL 参数名
pub const BASE_ACTION_URL: &str = "baseActionURL";
/// 下载动作 URL 参数名
pub const DOWNLOAD_ACTION_URL: &str = "downloadActionURL";

/// 标记规范化（tidy）
pub trait MarkupNormalizer: Send + Sync {
    /// 把松散的 HTML 规范化为格式良好的标记
    fn normalize(&self, markup: &str) -> Result<String>;
}

/// 不做任何修改的规范化器
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityNormalizer;

impl MarkupNormalizer for IdentityNormalizer {
    fn normalize(&self, markup: &str) -> Result<String> {
        Ok(markup.to_string())
    }
}

/// 根据浏览器信息选择返回的 MIME 类型
pub trait MediaResolver: Send + Sync {
    /// 返回的 MIME 类型
    fn mime_type(&self, browser_info: Option<&str>) -> String;
}

/// 固定返回 `text/html`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMediaResolver;

impl MediaResolver for DefaultMediaResolver {
    fn mime_type(&self, _browser_info: Option<&str>) -> String {
        "text/html".to_string()
    }
}

/// 交给转换管线的文档
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderDocument {
    /// 经过 tidy 规范化的标记
    Normalized(String),
    /// 原始文本，由转换管线自行解析
    Raw(String),
}

impl RenderDocument {
    /// 文档文本
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Normalized(text) | Self::Raw(text) => text,
        }
    }
}

/// 样式表选择
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StylesheetSelection {
    /// 显式给出的样式表
    Explicit(String),
    /// 从样式表列表中按标题与浏览器选择
    List {
        /// 样式表列表 URI
        ssl_uri: Option<String>,
        /// 样式表标题
        title: Option<String>,
        /// 浏览器信息
        browser_info: Option<String>,
    },
}

/// 渲染输入
#[derive(Debug, Clone)]
pub struct RenderPayload {
    /// 文档
    pub document: RenderDocument,
    /// 样式表选择
    pub stylesheet: StylesheetSelection,
    /// 交给样式表的参数
    pub parameters: IndexMap<String, String>,
    /// 未附加透传参数的资源 URI，用于绝对化相对链接
    pub base_uri: Option<String>,
    /// 返回的 MIME 类型
    pub mime_type: String,
}

/// 抓取当前资源并组装渲染输入；任何失败都包装为可恢复的渲染错误
pub async fn render(
    engine: &FetchEngine,
    session: &mut ChannelSession,
    cancel: &CancellationToken,
    normalizer: &dyn MarkupNormalizer,
    media: &dyn MediaResolver,
) -> Result<RenderPayload> {
    let document = match fetch_document(engine, session, cancel, normalizer).await {
        Ok(document) => document,
        Err(e) => {
            lerror!(
                session.uid,
                LogStage::Render,
                LogComponent::Channel,
                "render_failed",
                "渲染数据准备失败",
                kind = e.kind().as_str(),
                error = %e
            );
            return Err(ProxyError::rendering_with_source(RENDER_FAILURE_MESSAGE, true, e));
        }
    };

    let payload = RenderPayload {
        document,
        stylesheet: stylesheet_selection(session),
        parameters: parameter_snapshot(session),
        base_uri: session.xml_uri.clone(),
        mime_type: media.mime_type(session.runtime.browser_info.as_deref()),
    };
    ldebug!(
        session.uid,
        LogStage::Render,
        LogComponent::Channel,
        "render_payload_ready",
        "渲染数据准备完成",
        normalized = matches!(payload.document, RenderDocument::Normalized(_)),
        parameter_count = payload.parameters.len(),
        mime_type = %payload.mime_type
    );
    Ok(payload)
}

async fn fetch_document(
    engine: &FetchEngine,
    session: &mut ChannelSession,
    cancel: &CancellationToken,
    normalizer: &dyn MarkupNormalizer,
) -> Result<RenderDocument> {
    let uri = session
        .target_uri()
        .map(str::to_string)
        .ok_or_else(|| ProxyError::config("会话未配置资源 URI"))?;

    let response = engine.fetch(&uri, session, cancel).await?;
    let final_url = response.url().clone();
    let body = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(ProxyError::cancelled(format!("读取响应已取消: {uri}"))),
        body = response.bytes() => body.map_err(|e| engine.map_read_error(&final_url, e))?,
    };
    let text = String::from_utf8_lossy(&body).into_owned();

    if session.tidy_enabled() {
        normalizer
            .normalize(&text)
            .map(RenderDocument::Normalized)
            .map_err(|e| ProxyError::rendering_with_source(NORMALIZE_FAILURE_MESSAGE, true, e))
    } else {
        Ok(RenderDocument::Raw(text))
    }
}

/// 显式 `cw_xsl` 优先，否则按样式表列表与标题选择
#[must_use]
pub fn stylesheet_selection(session: &ChannelSession) -> StylesheetSelection {
    session.xsl_uri.clone().map_or_else(
        || StylesheetSelection::List {
            ssl_uri: session.ssl_uri.clone(),
            title: session.xsl_title.clone(),
            browser_info: session.runtime.browser_info.clone(),
        },
        StylesheetSelection::Explicit,
    )
}

/// 运行时参数（取第一个值）、动作 URL 与静态配置值
#[must_use]
pub fn parameter_snapshot(session: &ChannelSession) -> IndexMap<String, String> {
    let mut snapshot: IndexMap<String, String> = session
        .runtime
        .params
        .iter()
        .map(|(name, values)| (name.to_string(), values.first().cloned().unwrap_or_default()))
        .collect();

    if let Some(url) = &session.runtime.base_action_url {
        snapshot.insert(BASE_ACTION_URL.to_string(), url.clone());
    }
    if let Some(url) = &session.runtime.download_action_url {
        snapshot.insert(DOWNLOAD_ACTION_URL.to_string(), url.clone());
    }

    let statics = [
        (params::XML_URI, &session.xml_uri),
        (params::SSL_URI, &session.ssl_uri),
        (params::XSL_TITLE, &session.xsl_title),
        (params::XSL_URI, &session.xsl_uri),
        (params::PASS_THROUGH, &session.pass_through),
        (params::TIDY, &session.tidy),
        (params::INFO_URI, &session.info_uri),
        (params::HELP_URI, &session.help_uri),
        (params::EDIT_URI, &session.edit_uri),
    ];
    for (name, value) in statics {
        if let Some(value) = value {
            snapshot.insert(name.to_string(), value.clone());
        }
    }
    snapshot
}
