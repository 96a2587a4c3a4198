//! # 会话状态
//!
//! 每个渠道实例一份 [`ChannelSession`]，在静态配置加载时创建，
//! 之后每次请求由解析器就地修改，会话结束时由注册表销毁。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::channel::context::LocalConnectionContext;
use crate::channel::cookies::CookieJar;
use crate::channel::params::{self, ChannelRequest, RequestParams};
use crate::channel::types::{CacheMode, CacheScope, Identity, PassThroughMode, PersonAllow};
use crate::config::ChannelDefaults;
use crate::error::FailureKind;
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lwarn};

/// 缓存设置：默认层与本次请求的生效值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub(crate) default_timeout: u64,
    pub(crate) default_scope: CacheScope,
    pub(crate) default_mode: CacheMode,
    pub(crate) timeout: u64,
    pub(crate) scope: CacheScope,
    pub(crate) mode: CacheMode,
}

impl CacheSettings {
    /// 以默认层初始化，生效值等于默认值
    #[must_use]
    pub const fn new(default_timeout: u64, default_scope: CacheScope, default_mode: CacheMode) -> Self {
        Self {
            default_timeout,
            default_scope,
            default_mode,
            timeout: default_timeout,
            scope: default_scope,
            mode: default_mode,
        }
    }

    /// 默认超时（秒）
    #[must_use]
    pub const fn default_timeout(&self) -> u64 {
        self.default_timeout
    }

    /// 默认范围
    #[must_use]
    pub const fn default_scope(&self) -> CacheScope {
        self.default_scope
    }

    /// 默认模式
    #[must_use]
    pub const fn default_mode(&self) -> CacheMode {
        self.default_mode
    }

    /// 生效超时（秒）
    #[must_use]
    pub const fn timeout(&self) -> u64 {
        self.timeout
    }

    /// 生效范围，永远不宽于默认范围
    #[must_use]
    pub const fn scope(&self) -> CacheScope {
        self.scope
    }

    /// 生效模式
    #[must_use]
    pub const fn mode(&self) -> CacheMode {
        self.mode
    }
}

/// 静态数据中的 `cw_cacheTimeout`/`cw_cacheScope`/`cw_cacheMode`，只作用于第一次请求
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOverrides {
    /// 超时覆盖
    pub timeout: Option<u64>,
    /// 范围覆盖
    pub scope: Option<CacheScope>,
    /// 模式覆盖
    pub mode: Option<CacheMode>,
}

/// 单个渠道实例的运行时状态
pub struct ChannelSession {
    /// 会话标识
    pub uid: String,
    /// 所属身份
    pub identity: Identity,
    /// 静态配置的待转发身份属性（逗号分隔）
    pub person: Option<String>,
    /// 身份属性放行策略
    pub person_allow: PersonAllow,
    /// 主资源 URI
    pub xml_uri: Option<String>,
    /// 由编辑/帮助/关于事件临时替换的资源 URI
    pub button_xml_uri: Option<String>,
    /// 实际抓取的 URI（可能附带透传参数）
    pub full_xml_uri: Option<String>,
    /// 样式表列表 URI
    pub ssl_uri: Option<String>,
    /// 样式表标题
    pub xsl_title: Option<String>,
    /// 显式样式表 URI
    pub xsl_uri: Option<String>,
    /// 透传模式原始值
    pub pass_through: Option<String>,
    /// tidy 原始值
    pub tidy: Option<String>,
    /// 关于页 URI
    pub info_uri: Option<String>,
    /// 帮助页 URI
    pub help_uri: Option<String>,
    /// 编辑页 URI
    pub edit_uri: Option<String>,
    /// 缓存设置
    pub cache: CacheSettings,
    /// 首次请求使用的静态缓存覆盖
    pub cache_seed: Option<CacheOverrides>,
    /// 待通过 POST 发送的透传参数，发送一次后清空
    pub pending_body: Option<String>,
    /// 最近一次请求的运行时数据
    pub runtime: ChannelRequest,
    /// 会话私有的 Cookie 存储
    pub cookie_jar: CookieJar,
    /// 下载通道持有的上游响应
    pub conn_holder: Option<reqwest::Response>,
    /// 本地连接上下文
    pub local_context: Option<Arc<dyn LocalConnectionContext>>,
    /// 静态参数原文
    pub static_params: RequestParams,
}

impl fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSession")
            .field("uid", &self.uid)
            .field("identity", &self.identity.id)
            .field("xml_uri", &self.xml_uri)
            .field("button_xml_uri", &self.button_xml_uri)
            .field("full_xml_uri", &self.full_xml_uri)
            .field("pass_through", &self.pass_through)
            .field("cache", &self.cache)
            .field("has_pending_body", &self.pending_body.is_some())
            .field("has_conn_holder", &self.conn_holder.is_some())
            .field("has_local_context", &self.local_context.is_some())
            .finish_non_exhaustive()
    }
}

impl ChannelSession {
    /// 由编译期默认值和实例静态参数创建会话，静态参数优先
    #[must_use]
    pub fn from_static(
        uid: impl Into<String>,
        identity: Identity,
        static_params: RequestParams,
        defaults: &ChannelDefaults,
    ) -> Self {
        let uid = uid.into();
        let get = |name: &str| static_params.get(name).map(str::to_string);

        let person_allow = static_params
            .get(params::PERSON_ALLOW)
            .filter(|value| !value.trim().is_empty())
            .or(defaults.person_allow.as_deref())
            .map_or(PersonAllow::Unset, PersonAllow::parse);

        let default_timeout = static_params
            .get(params::CACHE_DEFAULT_TIMEOUT)
            .and_then(|value| parse_timeout(&uid, params::CACHE_DEFAULT_TIMEOUT, value))
            .unwrap_or(defaults.cache_default_timeout);
        let default_scope = static_params
            .get(params::CACHE_DEFAULT_SCOPE)
            .and_then(|value| parse_setting::<CacheScope>(&uid, params::CACHE_DEFAULT_SCOPE, value))
            .unwrap_or(defaults.cache_default_scope);
        let default_mode = static_params
            .get(params::CACHE_DEFAULT_MODE)
            .and_then(|value| parse_setting::<CacheMode>(&uid, params::CACHE_DEFAULT_MODE, value))
            .unwrap_or(defaults.cache_default_mode);

        let seed = CacheOverrides {
            timeout: static_params
                .get(params::CACHE_TIMEOUT)
                .and_then(|value| parse_timeout(&uid, params::CACHE_TIMEOUT, value)),
            scope: static_params
                .get(params::CACHE_SCOPE)
                .and_then(|value| parse_setting(&uid, params::CACHE_SCOPE, value)),
            mode: static_params
                .get(params::CACHE_MODE)
                .and_then(|value| parse_setting(&uid, params::CACHE_MODE, value)),
        };

        let mut cache = CacheSettings::new(default_timeout, default_scope, default_mode);
        if let Some(timeout) = seed.timeout {
            cache.timeout = timeout;
        }
        if let Some(scope) = seed.scope.filter(|scope| default_scope.permits(*scope)) {
            cache.scope = scope;
        }
        if let Some(mode) = seed.mode {
            cache.mode = mode;
        }

        let xml_uri = get(params::XML_URI);
        let session = Self {
            identity,
            person: get(params::PERSON),
            person_allow,
            full_xml_uri: xml_uri.clone(),
            xml_uri,
            button_xml_uri: None,
            ssl_uri: get(params::SSL_URI),
            xsl_title: get(params::XSL_TITLE),
            xsl_uri: get(params::XSL_URI),
            pass_through: get(params::PASS_THROUGH),
            tidy: get(params::TIDY),
            info_uri: get(params::INFO_URI),
            help_uri: get(params::HELP_URI),
            edit_uri: get(params::EDIT_URI),
            cache,
            cache_seed: (seed != CacheOverrides::default()).then_some(seed),
            pending_body: None,
            runtime: ChannelRequest::default(),
            cookie_jar: CookieJar::new(),
            conn_holder: None,
            local_context: None,
            static_params,
            uid,
        };

        ldebug!(
            session.uid,
            LogStage::SessionOpen,
            LogComponent::Channel,
            "session_loaded",
            "会话静态配置加载完成",
            xml_uri = ?session.xml_uri,
            cache_scope = %session.cache.scope,
            cache_mode = %session.cache.mode,
            cache_timeout = session.cache.timeout
        );
        session
    }

    /// 挂载本地连接上下文
    pub fn set_local_context(&mut self, context: Arc<dyn LocalConnectionContext>) {
        self.local_context = Some(context);
    }

    /// 当前透传模式
    #[must_use]
    pub fn pass_through_mode(&self) -> PassThroughMode {
        self.pass_through
            .as_deref()
            .map_or(PassThroughMode::None, PassThroughMode::parse)
    }

    /// tidy 是否开启
    #[must_use]
    pub fn tidy_enabled(&self) -> bool {
        self.tidy
            .as_deref()
            .is_some_and(|tidy| tidy.trim().eq_ignore_ascii_case("on"))
    }

    /// 本次请求实际要抓取的 URI
    #[must_use]
    pub fn target_uri(&self) -> Option<&str> {
        self.full_xml_uri.as_deref()
    }
}

/// 解析整秒超时；无法解析时按配置拒绝处理并返回 `None`
pub(crate) fn parse_timeout(uid: &str, name: &str, value: &str) -> Option<u64> {
    match value.trim().parse::<u64>() {
        Ok(seconds) => Some(seconds),
        Err(e) => {
            lwarn!(
                uid,
                LogStage::Resolve,
                LogComponent::Resolver,
                "invalid_timeout",
                "缓存超时无法解析为整秒，忽略该值",
                kind = FailureKind::ConfigurationDenied.as_str(),
                parameter = name,
                value = value,
                error = %e
            );
            None
        }
    }
}

/// 解析缓存范围/模式；未知取值按配置拒绝处理并返回 `None`
pub(crate) fn parse_setting<T>(uid: &str, name: &str, value: &str) -> Option<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match value.parse::<T>() {
        Ok(setting) => Some(setting),
        Err(e) => {
            lwarn!(
                uid,
                LogStage::Resolve,
                LogComponent::Resolver,
                "invalid_cache_setting",
                "未知的缓存设置，保留原值",
                kind = FailureKind::ConfigurationDenied.as_str(),
                parameter = name,
                value = value,
                error = %e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_params(pairs: &[(&str, &str)]) -> RequestParams {
        pairs.iter().copied().collect()
    }

    #[test]
    fn static_values_win_over_defaults() {
        let defaults = ChannelDefaults {
            person_allow: Some("uid".to_string()),
            ..ChannelDefaults::default()
        };
        let session = ChannelSession::from_static(
            "s1",
            Identity::new("7"),
            static_params(&[
                (params::XML_URI, "http://svc/data.xml"),
                (params::CACHE_DEFAULT_SCOPE, "system"),
                (params::CACHE_DEFAULT_MODE, "all"),
                (params::CACHE_DEFAULT_TIMEOUT, "60"),
                (params::PERSON_ALLOW, "mail, sn"),
            ]),
            &defaults,
        );

        assert_eq!(session.target_uri(), Some("http://svc/data.xml"));
        assert_eq!(session.cache.default_scope(), CacheScope::System);
        assert_eq!(session.cache.mode(), CacheMode::All);
        assert_eq!(session.cache.timeout(), 60);
        assert!(session.person_allow.allows("mail"));
        assert!(!session.person_allow.allows("uid"));
        assert!(session.cache_seed.is_none());
    }

    #[test]
    fn defaults_apply_when_static_data_is_silent() {
        let defaults = ChannelDefaults {
            person_allow: Some("*".to_string()),
            ..ChannelDefaults::default()
        };
        let session =
            ChannelSession::from_static("s1", Identity::new("7"), RequestParams::new(), &defaults);
        assert_eq!(session.cache.scope(), CacheScope::Instance);
        assert_eq!(session.cache.mode(), CacheMode::None);
        assert_eq!(session.cache.timeout(), 300);
        assert_eq!(session.person_allow, PersonAllow::AllowAll);
        assert_eq!(session.pass_through_mode(), PassThroughMode::None);
        assert!(!session.tidy_enabled());
        assert!(session.target_uri().is_none());
    }

    #[test]
    fn unparsable_static_values_are_ignored() {
        let session = ChannelSession::from_static(
            "s1",
            Identity::new("7"),
            static_params(&[
                (params::CACHE_DEFAULT_TIMEOUT, "five minutes"),
                (params::CACHE_DEFAULT_SCOPE, "galaxy"),
            ]),
            &ChannelDefaults::default(),
        );
        assert_eq!(session.cache.default_timeout(), 300);
        assert_eq!(session.cache.default_scope(), CacheScope::Instance);
    }

    #[test]
    fn static_overrides_seed_first_request() {
        let session = ChannelSession::from_static(
            "s1",
            Identity::new("7"),
            static_params(&[
                (params::CACHE_DEFAULT_SCOPE, "user"),
                (params::CACHE_SCOPE, "system"),
                (params::CACHE_MODE, "http"),
                (params::CACHE_TIMEOUT, "5"),
            ]),
            &ChannelDefaults::default(),
        );
        // 放宽范围的静态覆盖不生效
        assert_eq!(session.cache.scope(), CacheScope::User);
        assert_eq!(session.cache.mode(), CacheMode::Http);
        assert_eq!(session.cache.timeout(), 5);
        let seed = session.cache_seed.unwrap();
        assert_eq!(seed.scope, Some(CacheScope::System));
    }
}
