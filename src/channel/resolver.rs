//! # 参数解析器
//!
//! 把每次请求的运行时覆盖合并进会话快照。
//!
//! - 普通字段是粘性的：出现即替换，缺省保留上一次的值
//! - 缓存超时/范围/模式每次请求都由 (默认值, 覆盖值) 重新计算
//! - 缓存范围只能收窄：放宽的覆盖被拒绝并回落到默认范围，只记录日志
//! - 编辑/帮助/关于事件临时替换资源 URI，`cw_reset=return` 撤销替换

use crate::channel::params::{self, ChannelRequest};
use crate::channel::passthrough::PassThroughEncoder;
use crate::channel::session::{CacheOverrides, ChannelSession, parse_setting, parse_timeout};
use crate::channel::types::{CacheMode, CacheScope};
use crate::error::FailureKind;
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo, lwarn};

/// 导航事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    /// 编辑按钮
    Edit,
    /// 帮助按钮
    Help,
    /// 关于按钮
    About,
    /// 会话结束
    SessionDone,
    /// 取消订阅
    Unsubscribe,
}

/// 参数解析器
pub struct ParameterResolver;

impl ParameterResolver {
    /// 合并一次请求的运行时数据
    pub fn resolve(session: &mut ChannelSession, request: ChannelRequest) {
        let uid = session.uid.clone();

        if let Some(xml_uri) = request.param(params::XML_URI) {
            session.xml_uri = Some(xml_uri.to_string());
            // 显式给出新 URI 时无需 reset
            session.button_xml_uri = None;
        }
        sticky(&mut session.ssl_uri, &request, params::SSL_URI);
        sticky(&mut session.xsl_title, &request, params::XSL_TITLE);
        sticky(&mut session.xsl_uri, &request, params::XSL_URI);
        sticky(&mut session.pass_through, &request, params::PASS_THROUGH);
        sticky(&mut session.tidy, &request, params::TIDY);
        sticky(&mut session.info_uri, &request, params::INFO_URI);
        sticky(&mut session.edit_uri, &request, params::EDIT_URI);
        sticky(&mut session.help_uri, &request, params::HELP_URI);

        let person = request
            .param(params::PERSON)
            .map(str::to_string)
            .or_else(|| session.person.clone());

        let seed = session.cache_seed.take().unwrap_or_default();
        Self::resolve_cache(session, &request, &seed);
        Self::apply_reset(session, &request);

        session.pending_body = None;
        if let Some(button_uri) = session.button_xml_uri.clone() {
            session.full_xml_uri = Some(button_uri);
        } else if let Some(xml_uri) = session.xml_uri.clone() {
            if session
                .pass_through_mode()
                .triggers(request.is_in_channel_link())
            {
                let output = PassThroughEncoder::encode(
                    &uid,
                    &xml_uri,
                    person.as_deref(),
                    &session.person_allow,
                    &session.identity,
                    &request,
                );
                session.full_xml_uri = Some(output.full_uri);
                session.pending_body = output.body;
            } else {
                session.full_xml_uri = Some(xml_uri);
            }
        } else {
            session.full_xml_uri = None;
        }

        ldebug!(
            uid,
            LogStage::Resolve,
            LogComponent::Resolver,
            "runtime_data_resolved",
            "运行时参数合并完成",
            full_uri = ?session.full_xml_uri,
            cache_scope = %session.cache.scope(),
            cache_mode = %session.cache.mode(),
            cache_timeout = session.cache.timeout()
        );
        session.runtime = request;
    }

    /// 处理导航事件；返回会话是否应被关闭
    pub fn apply_event(session: &mut ChannelSession, event: ChannelEvent) -> bool {
        let target = match event {
            ChannelEvent::Edit => session.edit_uri.clone(),
            ChannelEvent::Help => session.help_uri.clone(),
            ChannelEvent::About => session.info_uri.clone(),
            ChannelEvent::SessionDone => return true,
            ChannelEvent::Unsubscribe => None,
        };

        if let Some(uri) = target {
            linfo!(
                session.uid,
                LogStage::Resolve,
                LogComponent::Resolver,
                "navigation_swap",
                "导航事件临时替换资源 URI",
                event = ?event,
                uri = %uri
            );
            session.button_xml_uri = Some(uri);
        }
        false
    }

    fn resolve_cache(session: &mut ChannelSession, request: &ChannelRequest, seed: &CacheOverrides) {
        let uid = session.uid.clone();
        let cache = &mut session.cache;

        if let Some(timeout) = request
            .param(params::CACHE_DEFAULT_TIMEOUT)
            .and_then(|value| parse_timeout(&uid, params::CACHE_DEFAULT_TIMEOUT, value))
        {
            cache.default_timeout = timeout;
        }
        cache.timeout = request
            .param(params::CACHE_TIMEOUT)
            .and_then(|value| parse_timeout(&uid, params::CACHE_TIMEOUT, value))
            .or(seed.timeout)
            .unwrap_or(cache.default_timeout);

        if let Some(default_scope) = request
            .param(params::CACHE_DEFAULT_SCOPE)
            .and_then(|value| parse_setting::<CacheScope>(&uid, params::CACHE_DEFAULT_SCOPE, value))
        {
            if cache.default_scope.permits(default_scope) {
                cache.default_scope = default_scope;
            } else {
                deny_widening(&uid, params::CACHE_DEFAULT_SCOPE, cache.default_scope, default_scope);
            }
        }
        let requested_scope = request
            .param(params::CACHE_SCOPE)
            .and_then(|value| parse_setting::<CacheScope>(&uid, params::CACHE_SCOPE, value))
            .or(seed.scope);
        cache.scope = match requested_scope {
            Some(scope) if cache.default_scope.permits(scope) => scope,
            Some(scope) => {
                deny_widening(&uid, params::CACHE_SCOPE, cache.default_scope, scope);
                cache.default_scope
            }
            None => cache.default_scope,
        };

        if let Some(default_mode) = request
            .param(params::CACHE_DEFAULT_MODE)
            .and_then(|value| parse_setting::<CacheMode>(&uid, params::CACHE_DEFAULT_MODE, value))
        {
            cache.default_mode = default_mode;
        }
        cache.mode = request
            .param(params::CACHE_MODE)
            .and_then(|value| parse_setting::<CacheMode>(&uid, params::CACHE_MODE, value))
            .or(seed.mode)
            .unwrap_or(cache.default_mode);
    }

    fn apply_reset(session: &mut ChannelSession, request: &ChannelRequest) {
        let Some(reset) = request.param(params::RESET) else {
            return;
        };
        if reset.eq_ignore_ascii_case("return") {
            session.button_xml_uri = None;
        } else {
            // 完整重置到静态配置未实现
            lwarn!(
                session.uid,
                LogStage::Resolve,
                LogComponent::Resolver,
                "reset_unsupported",
                "不支持的重置信号，忽略",
                kind = FailureKind::ConfigurationDenied.as_str(),
                reset = reset
            );
        }
    }
}

fn sticky(slot: &mut Option<String>, request: &ChannelRequest, name: &str) {
    if let Some(value) = request.param(name) {
        *slot = Some(value.to_string());
    }
}

fn deny_widening(uid: &str, parameter: &str, current: CacheScope, requested: CacheScope) {
    lwarn!(
        uid,
        LogStage::Resolve,
        LogComponent::Resolver,
        "scope_widening_denied",
        "拒绝放宽缓存范围，回落到默认范围",
        kind = FailureKind::ConfigurationDenied.as_str(),
        parameter = parameter,
        default_scope = %current,
        requested_scope = %requested
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::params::RequestParams;
    use crate::channel::types::Identity;
    use crate::config::ChannelDefaults;

    fn session(pairs: &[(&str, &str)]) -> ChannelSession {
        ChannelSession::from_static(
            "s1",
            Identity::new("7").with_attribute("uid", "jdoe"),
            pairs.iter().copied().collect(),
            &ChannelDefaults::default(),
        )
    }

    fn get(pairs: &[(&str, &str)]) -> ChannelRequest {
        ChannelRequest::get(pairs.iter().copied().collect())
    }

    #[test]
    fn sticky_fields_survive_silent_requests() {
        let mut session = session(&[(params::XML_URI, "http://svc/a.xml")]);
        ParameterResolver::resolve(&mut session, get(&[(params::XSL_URI, "http://svc/a.xsl")]));
        ParameterResolver::resolve(&mut session, get(&[]));
        assert_eq!(session.xsl_uri.as_deref(), Some("http://svc/a.xsl"));
        assert_eq!(session.full_xml_uri.as_deref(), Some("http://svc/a.xml"));
    }

    #[test]
    fn cache_fields_recompute_every_request() {
        let mut session = session(&[(params::CACHE_DEFAULT_SCOPE, "system")]);
        ParameterResolver::resolve(
            &mut session,
            get(&[(params::CACHE_TIMEOUT, "5"), (params::CACHE_SCOPE, "user"), (params::CACHE_MODE, "all")]),
        );
        assert_eq!(session.cache.timeout(), 5);
        assert_eq!(session.cache.scope(), CacheScope::User);
        assert_eq!(session.cache.mode(), CacheMode::All);

        ParameterResolver::resolve(&mut session, get(&[]));
        assert_eq!(session.cache.timeout(), 300);
        assert_eq!(session.cache.scope(), CacheScope::System);
        assert_eq!(session.cache.mode(), CacheMode::None);
    }

    #[test]
    fn widening_scope_falls_back_to_default() {
        let mut session = session(&[(params::CACHE_DEFAULT_SCOPE, "user")]);
        ParameterResolver::resolve(&mut session, get(&[(params::CACHE_SCOPE, "system")]));
        assert_eq!(session.cache.scope(), CacheScope::User);

        ParameterResolver::resolve(&mut session, get(&[(params::CACHE_SCOPE, "instance")]));
        assert_eq!(session.cache.scope(), CacheScope::Instance);

        ParameterResolver::resolve(&mut session, get(&[(params::CACHE_DEFAULT_SCOPE, "system")]));
        assert_eq!(session.cache.default_scope(), CacheScope::User);
    }

    #[test]
    fn static_seed_applies_only_once() {
        let mut session = session(&[(params::CACHE_MODE, "all"), (params::CACHE_TIMEOUT, "9")]);
        ParameterResolver::resolve(&mut session, get(&[]));
        assert_eq!(session.cache.mode(), CacheMode::All);
        assert_eq!(session.cache.timeout(), 9);

        ParameterResolver::resolve(&mut session, get(&[]));
        assert_eq!(session.cache.mode(), CacheMode::None);
        assert_eq!(session.cache.timeout(), 300);
    }

    #[test]
    fn navigation_swap_and_return() {
        let mut session = session(&[
            (params::XML_URI, "http://svc/a.xml"),
            (params::HELP_URI, "http://svc/help.xml"),
        ]);
        assert!(!ParameterResolver::apply_event(&mut session, ChannelEvent::Help));
        ParameterResolver::resolve(&mut session, get(&[]));
        assert_eq!(session.full_xml_uri.as_deref(), Some("http://svc/help.xml"));

        // 未配置编辑页时保持不变
        ParameterResolver::apply_event(&mut session, ChannelEvent::Edit);
        assert_eq!(session.button_xml_uri.as_deref(), Some("http://svc/help.xml"));

        ParameterResolver::resolve(&mut session, get(&[(params::RESET, "return")]));
        assert_eq!(session.full_xml_uri.as_deref(), Some("http://svc/a.xml"));
        assert!(ParameterResolver::apply_event(&mut session, ChannelEvent::SessionDone));
    }

    #[test]
    fn new_xml_uri_clears_swap() {
        let mut session = session(&[
            (params::XML_URI, "http://svc/a.xml"),
            (params::INFO_URI, "http://svc/about.xml"),
        ]);
        ParameterResolver::apply_event(&mut session, ChannelEvent::About);
        ParameterResolver::resolve(&mut session, get(&[(params::XML_URI, "http://svc/b.xml")]));
        assert_eq!(session.full_xml_uri.as_deref(), Some("http://svc/b.xml"));
        assert!(session.button_xml_uri.is_none());
    }

    #[test]
    fn pass_through_only_when_triggered() {
        let mut session = session(&[
            (params::XML_URI, "http://svc/a.xml"),
            (params::PASS_THROUGH, "marked"),
        ]);
        ParameterResolver::resolve(&mut session, get(&[("q", "1")]));
        assert_eq!(session.full_xml_uri.as_deref(), Some("http://svc/a.xml"));

        let request = ChannelRequest::get(
            RequestParams::new()
                .with("q", "1")
                .with_flag(params::IN_CHANNEL_LINK),
        );
        ParameterResolver::resolve(&mut session, request);
        assert_eq!(session.full_xml_uri.as_deref(), Some("http://svc/a.xml?q=1"));

        // 不透传时回到主 URI
        ParameterResolver::resolve(&mut session, get(&[("q", "2")]));
        assert_eq!(session.full_xml_uri.as_deref(), Some("http://svc/a.xml"));
    }

    #[test]
    fn runtime_person_overrides_static_for_one_request() {
        let mut session = session(&[
            (params::XML_URI, "http://svc/me"),
            (params::PASS_THROUGH, "all"),
            (params::PERSON, "uid"),
            (params::PERSON_ALLOW, "*"),
        ]);
        ParameterResolver::resolve(&mut session, get(&[(params::PERSON, "mail")]));
        assert_eq!(session.full_xml_uri.as_deref(), Some("http://svc/me?mail="));

        ParameterResolver::resolve(&mut session, get(&[]));
        assert_eq!(session.full_xml_uri.as_deref(), Some("http://svc/me?uid=jdoe"));
    }

    #[test]
    fn post_leaves_body_pending() {
        let mut session = session(&[
            (params::XML_URI, "http://svc/login"),
            (params::PASS_THROUGH, "application"),
        ]);
        ParameterResolver::resolve(
            &mut session,
            ChannelRequest::post(RequestParams::new().with("user", "jdoe")),
        );
        assert_eq!(session.full_xml_uri.as_deref(), Some("http://svc/login"));
        assert_eq!(session.pending_body.as_deref(), Some("user=jdoe"));
    }
}
