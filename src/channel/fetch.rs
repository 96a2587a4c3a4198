//! # 抓取引擎
//!
//! 代表终端用户抓取上游资源：
//! 1. 本地连接上下文改写 URI，解析 Cookie 坐标
//! 2. 关闭传输层自动重定向，由引擎自己跟随
//! 3. 回放 Cookie，POST 时附带透传请求体（只发送一次）
//! 4. 保存 `Set-Cookie`，按状态码分类
//!
//! 重定向是带跳数上限的显式循环，每一跳都重新读写 Cookie。

use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderValue, LOCATION, SET_COOKIE};
use reqwest::{Client, Response, StatusCode, redirect};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::channel::context::OutgoingRequest;
use crate::channel::cookies::CookieCoordinates;
use crate::channel::params::HttpMethod;
use crate::channel::session::ChannelSession;
use crate::config::HttpClientConfig;
use crate::error::{ProxyError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lerror, linfo, lwarn};

/// 表单请求体的内容类型
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// 抓取引擎
#[derive(Debug, Clone)]
pub struct FetchEngine {
    client: Client,
    config: HttpClientConfig,
}

/// 单跳的处理结果
enum HopOutcome {
    Done(Response),
    Redirect(Url),
}

impl FetchEngine {
    /// 按配置创建 HTTP 客户端
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ProxyError::config_with_source("HTTP客户端创建失败", e))?;
        Ok(Self { client, config })
    }

    /// 客户端配置
    #[must_use]
    pub const fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// 抓取 `uri`，跟随重定向直到得到最终响应
    ///
    /// 返回的响应体尚未读取；`cancel` 被触发时立即放弃当前请求。
    pub async fn fetch(
        &self,
        uri: &str,
        session: &mut ChannelSession,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let mut target = uri.to_string();
        let mut hops = 0usize;

        loop {
            match self.fetch_once(&target, session, cancel).await? {
                HopOutcome::Done(response) => return Ok(response),
                HopOutcome::Redirect(location) => {
                    hops += 1;
                    if hops > self.config.max_redirects {
                        lerror!(
                            session.uid,
                            LogStage::Redirect,
                            LogComponent::FetchEngine,
                            "redirect_limit_exceeded",
                            "重定向次数超过上限",
                            kind = crate::error::FailureKind::ResourceUnavailable.as_str(),
                            url = %location,
                            max_redirects = self.config.max_redirects
                        );
                        return Err(ProxyError::redirect_loop(location.as_str(), hops));
                    }
                    linfo!(
                        session.uid,
                        LogStage::Redirect,
                        LogComponent::FetchEngine,
                        "follow_redirect",
                        "跟随上游重定向",
                        from = %target,
                        to = %location,
                        hop = hops
                    );
                    target = location.into();
                }
            }
        }
    }

    async fn fetch_once(
        &self,
        uri: &str,
        session: &mut ChannelSession,
        cancel: &CancellationToken,
    ) -> Result<HopOutcome> {
        let resolved = match &session.local_context {
            Some(context) => context.rewrite(uri, &session.runtime),
            None => uri.to_string(),
        };
        let url = parse_target(&resolved)?;
        let coordinates = CookieCoordinates::from_url(&url).ok_or_else(|| {
            ProxyError::resource_unavailable(url.as_str(), "URL has no host or port")
        })?;

        let mut outgoing = OutgoingRequest::new(url.clone());
        if let Some(cookie) = session.cookie_jar.header_for(&coordinates) {
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    outgoing.headers.insert(COOKIE, value);
                }
                Err(e) => lwarn!(
                    session.uid,
                    LogStage::UpstreamRequest,
                    LogComponent::CookieJar,
                    "cookie_header_invalid",
                    "Cookie 无法作为请求头发送，跳过",
                    coordinates = %coordinates,
                    error = %e
                ),
            }
        }

        let original_method = session.runtime.method;
        let send_body = original_method == HttpMethod::Post
            && session
                .pending_body
                .as_deref()
                .is_some_and(|body| !body.trim().is_empty());
        if send_body {
            outgoing.method = HttpMethod::Post;
        }

        if let Some(context) = &session.local_context {
            if let Err(e) = context.augment(&session.runtime, &mut outgoing) {
                lerror!(
                    session.uid,
                    LogStage::UpstreamRequest,
                    LogComponent::ConnContext,
                    "context_augment_failed",
                    "本地连接上下文发送数据失败",
                    kind = e.kind().as_str(),
                    context = context.name(),
                    error = %e
                );
            }
        }

        if send_body {
            if let Some(body) = session.pending_body.take() {
                outgoing.body = Some(match outgoing.body.take() {
                    Some(local) if !local.is_empty() => format!("{local}&{body}"),
                    _ => body,
                });
            }
        }

        ldebug!(
            session.uid,
            LogStage::UpstreamRequest,
            LogComponent::FetchEngine,
            "send_upstream_request",
            "发送上游请求",
            method = %outgoing.method,
            url = %outgoing.url,
            has_cookie = outgoing.headers.contains_key(COOKIE),
            has_body = outgoing.body.is_some()
        );

        let response = self.send(outgoing, &session.uid, cancel).await?;

        let stored = session.cookie_jar.store(
            &coordinates,
            response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok()),
        );
        if stored > 0 {
            ldebug!(
                session.uid,
                LogStage::UpstreamResponse,
                LogComponent::CookieJar,
                "cookies_stored",
                "保存上游下发的 Cookie",
                coordinates = %coordinates,
                count = stored
            );
        }

        let status = response.status();
        ldebug!(
            session.uid,
            LogStage::UpstreamResponse,
            LogComponent::FetchEngine,
            "upstream_response",
            "收到上游响应",
            url = %url,
            status = status.as_u16()
        );

        Self::classify(session, url, original_method, response)
    }

    fn classify(
        session: &ChannelSession,
        url: Url,
        original_method: HttpMethod,
        response: Response,
    ) -> Result<HopOutcome> {
        let status = response.status();
        match status {
            StatusCode::NOT_FOUND
            | StatusCode::FORBIDDEN
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::NO_CONTENT => Err(unavailable(session, &url, status_text(status))),
            StatusCode::MOVED_PERMANENTLY if original_method != HttpMethod::Get => Err(unavailable(
                session,
                &url,
                "HTTP Status-Code 301: POST Redirection currently not supported".to_string(),
            )),
            StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER => {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| url.join(value).ok())
                    .ok_or_else(|| {
                        unavailable(
                            session,
                            &url,
                            format!("{}: missing Location header", status_text(status)),
                        )
                    })?;
                Ok(HopOutcome::Redirect(location))
            }
            _ => Ok(HopOutcome::Done(response)),
        }
    }

    async fn send(
        &self,
        outgoing: OutgoingRequest,
        uid: &str,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let method = match outgoing.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };
        let mut builder = self
            .client
            .request(method, outgoing.url.clone())
            .headers(outgoing.headers);
        if let Some(body) = outgoing.body {
            builder = builder.header(CONTENT_TYPE, FORM_CONTENT_TYPE).body(body);
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                linfo!(
                    uid,
                    LogStage::UpstreamRequest,
                    LogComponent::FetchEngine,
                    "fetch_cancelled",
                    "会话结束，放弃进行中的抓取",
                    url = %outgoing.url
                );
                Err(ProxyError::cancelled(format!("抓取已取消: {}", outgoing.url)))
            }
            result = builder.send() => result.map_err(|e| self.map_send_error(&outgoing.url, e)),
        }
    }

    fn map_send_error(&self, url: &Url, error: reqwest::Error) -> ProxyError {
        if error.is_timeout() && error.is_connect() {
            ProxyError::connection_timeout_with_source(
                format!("连接上游超时: {url}"),
                self.config.connect_timeout_secs,
                error,
            )
        } else if error.is_timeout() {
            ProxyError::read_timeout_with_source(
                format!("读取上游响应超时: {url}"),
                self.config.read_timeout_secs,
                error,
            )
        } else {
            ProxyError::network_with_source(format!("上游请求失败: {url}"), error)
        }
    }

    /// 映射读取响应体时的错误；两次读取之间超过读取超时报告为 `ReadTimeout`
    #[must_use]
    pub fn map_read_error(&self, url: &Url, error: reqwest::Error) -> ProxyError {
        if error.is_timeout() {
            ProxyError::read_timeout_with_source(
                format!("读取上游响应体超时: {url}"),
                self.config.read_timeout_secs,
                error,
            )
        } else {
            ProxyError::network_with_source(format!("读取上游响应失败: {url}"), error)
        }
    }
}

fn parse_target(uri: &str) -> Result<Url> {
    let url = Url::parse(uri)
        .map_err(|e| ProxyError::resource_unavailable(uri, format!("Invalid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ProxyError::resource_unavailable(
            uri,
            format!("Unsupported protocol: {other}"),
        )),
    }
}

fn status_text(status: StatusCode) -> String {
    format!(
        "HTTP Status-Code {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    )
}

fn unavailable(session: &ChannelSession, url: &Url, status_text: String) -> ProxyError {
    let error = ProxyError::resource_unavailable(url.as_str(), status_text);
    lwarn!(
        session.uid,
        LogStage::UpstreamResponse,
        LogComponent::FetchEngine,
        "resource_unavailable",
        "上游资源不可用",
        kind = error.kind().as_str(),
        error = %error
    );
    error
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_uses_canonical_reason() {
        assert_eq!(status_text(StatusCode::NOT_FOUND), "HTTP Status-Code 404: Not Found");
        assert_eq!(status_text(StatusCode::NO_CONTENT), "HTTP Status-Code 204: No Content");
        assert_eq!(
            status_text(StatusCode::INTERNAL_SERVER_ERROR),
            "HTTP Status-Code 500: Internal Server Error"
        );
    }

    #[test]
    fn only_http_targets_are_fetched() {
        assert!(parse_target("https://svc/a").is_ok());
        assert!(matches!(
            parse_target("file:///etc/passwd"),
            Err(ProxyError::ResourceUnavailable { .. })
        ));
        assert!(parse_target("not a url").is_err());
    }

    #[test]
    fn engine_builds_from_default_config() {
        let engine = FetchEngine::new(HttpClientConfig::default()).unwrap();
        assert_eq!(engine.config().max_redirects, 10);
    }
}
