//! # 日志配置模块
//!
//! 提供日志系统初始化，以及带有阶段/组件字段的结构化日志宏

use std::env;
use std::fmt;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 日志所处的处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStage {
    /// 进程启动
    Startup,
    /// 会话建立（静态配置加载）
    SessionOpen,
    /// 运行时参数合并
    Resolve,
    /// 透传参数编码
    PassThrough,
    /// 上游请求发送
    UpstreamRequest,
    /// 上游响应处理
    UpstreamResponse,
    /// 重定向跟随
    Redirect,
    /// 缓存键/有效性判定
    CacheDecision,
    /// 渲染数据准备
    Render,
    /// 原始下载
    Download,
    /// 会话结束
    SessionClose,
    /// 错误处理
    Error,
    /// 进程退出
    Shutdown,
}

impl LogStage {
    /// 字段值
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::SessionOpen => "session_open",
            Self::Resolve => "resolve",
            Self::PassThrough => "pass_through",
            Self::UpstreamRequest => "upstream_request",
            Self::UpstreamResponse => "upstream_response",
            Self::Redirect => "redirect",
            Self::CacheDecision => "cache_decision",
            Self::Render => "render",
            Self::Download => "download",
            Self::SessionClose => "session_close",
            Self::Error => "error",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for LogStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 产生日志的组件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogComponent {
    /// 命令行入口
    Main,
    /// 配置加载
    Configuration,
    /// 会话注册表
    Registry,
    /// 参数解析器
    Resolver,
    /// 透传编码器
    Encoder,
    /// Cookie 存储
    CookieJar,
    /// 抓取引擎
    FetchEngine,
    /// 本地连接上下文
    ConnContext,
    /// 缓存键引擎
    Cache,
    /// 下载通道
    Download,
    /// 渠道门面
    Channel,
}

impl LogComponent {
    /// 字段值
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Configuration => "configuration",
            Self::Registry => "registry",
            Self::Resolver => "resolver",
            Self::Encoder => "encoder",
            Self::CookieJar => "cookie_jar",
            Self::FetchEngine => "fetch_engine",
            Self::ConnContext => "conn_context",
            Self::Cache => "cache",
            Self::Download => "download",
            Self::Channel => "channel",
        }
    }
}

impl fmt::Display for LogComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 结构化 DEBUG 日志
///
/// 参数依次为：请求/会话标识、阶段、组件、操作名、描述，之后可追加任意 tracing 字段。
#[macro_export]
macro_rules! ldebug {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr $(, $($fields:tt)*)?) => {
        ::tracing::debug!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($($fields)*,)?
            "{}",
            $description
        )
    };
}

/// 结构化 INFO 日志
#[macro_export]
macro_rules! linfo {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr $(, $($fields:tt)*)?) => {
        ::tracing::info!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($($fields)*,)?
            "{}",
            $description
        )
    };
}

/// 结构化 WARN 日志
#[macro_export]
macro_rules! lwarn {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr $(, $($fields:tt)*)?) => {
        ::tracing::warn!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($($fields)*,)?
            "{}",
            $description
        )
    };
}

/// 结构化 ERROR 日志
#[macro_export]
macro_rules! lerror {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr $(, $($fields:tt)*)?) => {
        ::tracing::error!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($($fields)*,)?
            "{}",
            $description
        )
    };
}

/// 初始化日志系统
///
/// `RUST_LOG` 优先；否则使用 `level`（默认 info），并压低 HTTP 客户端栈的噪声。
pub fn init_logging(log_level: Option<&str>) {
    let level = log_level.unwrap_or("info");

    let default_filter = format!("{level},web_proxy=debug,reqwest=warn,hyper=warn,hyper_util=warn");
    let log_filter = env::var("RUST_LOG").unwrap_or(default_filter);

    let result = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter.into()))
        .with(
            tracing_fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init();

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed, keeping the existing one");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_and_component_render_as_snake_case() {
        assert_eq!(LogStage::UpstreamRequest.to_string(), "upstream_request");
        assert_eq!(LogComponent::CookieJar.to_string(), "cookie_jar");
    }

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(Some("debug"));
        init_logging(None);
        linfo!(
            "test-session",
            LogStage::Startup,
            LogComponent::Main,
            "logging_ready",
            "日志系统就绪",
            attempt = 2
        );
    }
}
