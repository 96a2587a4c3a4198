//! # 错误类型定义

use thiserror::Error;

use super::FailureKind;

/// 渠道主要错误类型
#[derive(Debug, Error)]
pub enum ProxyError {
    /// 配置加载/校验错误（硬错误，区别于软拒绝的覆盖请求）
    #[error("配置错误: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 上游资源不可用（404/403/500/204 或不支持的 POST 重定向）
    #[error("资源不可用: {url} ({status_text})")]
    ResourceUnavailable { url: String, status_text: String },

    /// 重定向链超出上限
    #[error("重定向循环: {url} 超过 {hops} 跳")]
    RedirectLoop { url: String, hops: usize },

    /// 渲染失败，包装抓取/规范化/转换错误
    #[error("渲染失败: {message}")]
    Rendering {
        message: String,
        /// 下一次请求时会话是否仍可继续使用
        recoverable: bool,
        #[source]
        source: Option<Box<ProxyError>>,
    },

    /// 连接超时
    #[error("连接超时: {message}")]
    ConnectionTimeout {
        message: String,
        timeout_seconds: u64,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 读取超时
    #[error("读取超时: {message}")]
    ReadTimeout {
        message: String,
        timeout_seconds: u64,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 网络通信错误
    #[error("网络错误: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 抓取被取消（会话结束）
    #[error("请求已取消: {message}")]
    Cancelled { message: String },

    /// 会话不存在
    #[error("会话不存在: {uid}")]
    MissingSession { uid: String },

    /// 下载流不可用（未抓取或已被取走）
    #[error("下载流不可用: {message}")]
    StreamUnavailable { message: String },

    /// 系统内部错误
    #[error("内部错误: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// IO相关错误
    #[error("IO错误: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// 附加上下文的错误
    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<ProxyError>,
    },
}

impl ProxyError {
    /// 错误所属的失败类别，用于结构化日志
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Config { .. } => FailureKind::ConfigurationDenied,
            Self::ResourceUnavailable { .. }
            | Self::RedirectLoop { .. }
            | Self::ConnectionTimeout { .. }
            | Self::ReadTimeout { .. }
            | Self::Network { .. }
            | Self::Cancelled { .. }
            | Self::StreamUnavailable { .. } => FailureKind::ResourceUnavailable,
            Self::Rendering { .. } | Self::Internal { .. } | Self::Io { .. } => {
                FailureKind::TransformFailure
            }
            Self::MissingSession { .. } => FailureKind::MissingSession,
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// 会话在下一次请求时是否可以继续使用
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Rendering { recoverable, .. } => *recoverable,
            Self::MissingSession { .. } | Self::Cancelled { .. } => false,
            Self::Context { source, .. } => source.is_recoverable(),
            _ => true,
        }
    }

    /// 创建配置错误
    pub fn config<T: Into<String>>(message: T) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的配置错误
    pub fn config_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建资源不可用错误
    pub fn resource_unavailable<U: Into<String>, S: Into<String>>(url: U, status_text: S) -> Self {
        Self::ResourceUnavailable {
            url: url.into(),
            status_text: status_text.into(),
        }
    }

    /// 创建重定向循环错误
    pub fn redirect_loop<U: Into<String>>(url: U, hops: usize) -> Self {
        Self::RedirectLoop {
            url: url.into(),
            hops,
        }
    }

    /// 创建渲染错误
    pub fn rendering<T: Into<String>>(message: T, recoverable: bool) -> Self {
        Self::Rendering {
            message: message.into(),
            recoverable,
            source: None,
        }
    }

    /// 创建带来源的渲染错误
    pub fn rendering_with_source<T: Into<String>>(
        message: T,
        recoverable: bool,
        source: ProxyError,
    ) -> Self {
        Self::Rendering {
            message: message.into(),
            recoverable,
            source: Some(Box::new(source)),
        }
    }

    /// 创建网络错误
    pub fn network<T: Into<String>>(message: T) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的网络错误
    pub fn network_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建带来源的连接超时错误
    pub fn connection_timeout_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        timeout_seconds: u64,
        source: E,
    ) -> Self {
        Self::ConnectionTimeout {
            message: message.into(),
            timeout_seconds,
            source: Some(source.into()),
        }
    }

    /// 创建带来源的读取超时错误
    pub fn read_timeout_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        timeout_seconds: u64,
        source: E,
    ) -> Self {
        Self::ReadTimeout {
            message: message.into(),
            timeout_seconds,
            source: Some(source.into()),
        }
    }

    /// 创建取消错误
    pub fn cancelled<T: Into<String>>(message: T) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// 创建会话不存在错误
    pub fn missing_session<T: Into<String>>(uid: T) -> Self {
        Self::MissingSession { uid: uid.into() }
    }

    /// 创建下载流不可用错误
    pub fn stream_unavailable<T: Into<String>>(message: T) -> Self {
        Self::StreamUnavailable {
            message: message.into(),
        }
    }

    /// 创建内部错误
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的内部错误
    pub fn internal_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

// 自动转换常见错误类型
impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: "文件操作失败".to_string(),
            source: err,
        }
    }
}

impl From<toml::de::Error> for ProxyError {
    fn from(err: toml::de::Error) -> Self {
        Self::config_with_source("TOML解析失败", err)
    }
}

impl From<url::ParseError> for ProxyError {
    fn from(err: url::ParseError) -> Self {
        Self::config_with_source("URL解析失败", err)
    }
}

// Reqwest错误转换；超时由抓取引擎按阶段单独映射
impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        Self::network_with_source("HTTP请求失败", err)
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal_with_source("JSON序列化失败", err)
    }
}
