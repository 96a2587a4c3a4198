//! # 透传参数编码
//!
//! 把允许转发的身份属性与终端请求参数编码为上游查询串（GET）或请求体（POST）。
//!
//! ## 编码规则
//! - 身份属性：`name=value`，值做 form-urlencoded；未放行的属性名跳过并记录日志
//! - 关键字查询：原样追加，并抑制普通参数转发
//! - 普通参数：跳过 `cw_`/`upc_` 前缀；多值参数按顺序重复输出，无值参数只输出名字

use url::form_urlencoded;

use crate::channel::params::{self, ChannelRequest, HttpMethod, RequestParams};
use crate::channel::types::{Identity, PersonAllow};
use crate::error::FailureKind;
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo};

/// 透传编码结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassThroughOutput {
    /// 编码后的参数串
    pub encoded: String,
    /// 是否已追加到资源 URI 的查询部分
    pub appended_to_uri: bool,
    /// 本次要抓取的完整 URI
    pub full_uri: String,
    /// POST 时待发送的请求体
    pub body: Option<String>,
}

/// 透传编码器
pub struct PassThroughEncoder;

impl PassThroughEncoder {
    /// 编码并放置透传参数
    ///
    /// `person` 是本次请求生效的身份属性列表（运行时 `cw_person` 优先于静态值）。
    #[must_use]
    pub fn encode(
        uid: &str,
        xml_uri: &str,
        person: Option<&str>,
        allow: &PersonAllow,
        identity: &Identity,
        request: &ChannelRequest,
    ) -> PassThroughOutput {
        let mut segments = Self::identity_segments(uid, person, allow, identity);

        if let Some(keywords) = request.keywords.as_deref() {
            // 关键字与普通参数互斥
            if segments.is_empty() {
                segments.push(keywords.to_string());
            } else {
                segments.push(format!("keywords={keywords}"));
            }
        } else {
            let generic = encode_request_params(&request.params);
            if !generic.is_empty() {
                segments.push(generic);
            }
        }

        let encoded = segments.join("&");
        let output = Self::place(xml_uri, encoded, request.method);

        ldebug!(
            uid,
            LogStage::PassThrough,
            LogComponent::Encoder,
            "pass_through_encoded",
            "透传参数编码完成",
            method = %request.method,
            appended_to_uri = output.appended_to_uri,
            full_uri = %output.full_uri,
            has_body = output.body.is_some()
        );
        output
    }

    /// GET 追加到查询串，POST 保留为请求体
    #[must_use]
    pub fn place(xml_uri: &str, encoded: String, method: HttpMethod) -> PassThroughOutput {
        let has_content = !encoded.trim().is_empty();
        match method {
            HttpMethod::Post => PassThroughOutput {
                body: has_content.then(|| encoded.clone()),
                encoded,
                appended_to_uri: false,
                full_uri: xml_uri.to_string(),
            },
            HttpMethod::Get if has_content => {
                let separator = if xml_uri.contains('?') { '&' } else { '?' };
                PassThroughOutput {
                    full_uri: format!("{xml_uri}{separator}{encoded}"),
                    encoded,
                    appended_to_uri: true,
                    body: None,
                }
            }
            HttpMethod::Get => PassThroughOutput {
                encoded,
                appended_to_uri: false,
                full_uri: xml_uri.to_string(),
                body: None,
            },
        }
    }

    fn identity_segments(
        uid: &str,
        person: Option<&str>,
        allow: &PersonAllow,
        identity: &Identity,
    ) -> Vec<String> {
        let Some(person) = person else {
            return Vec::new();
        };
        if allow.forbids_all() {
            return Vec::new();
        }

        let mut segments = Vec::new();
        for name in person.split(',').map(str::trim).filter(|name| !name.is_empty()) {
            if !allow.allows(name) {
                linfo!(
                    uid,
                    LogStage::PassThrough,
                    LogComponent::Encoder,
                    "identity_attribute_denied",
                    "身份属性不在放行列表中，拒绝转发",
                    kind = FailureKind::ConfigurationDenied.as_str(),
                    attribute = name
                );
                continue;
            }
            let value = identity.attribute(name).map(encode_component).unwrap_or_default();
            segments.push(format!("{name}={value}"));
        }
        segments
    }
}

/// 编码非保留的请求参数
#[must_use]
pub fn encode_request_params(params: &RequestParams) -> String {
    let mut pairs = Vec::new();
    for (name, values) in params.iter() {
        if params::is_reserved(name) || name.trim().is_empty() {
            continue;
        }
        let encoded_name = encode_component(name);
        if values.is_empty() {
            pairs.push(encoded_name);
        } else {
            for value in values {
                pairs.push(format!("{encoded_name}={}", encode_component(value)));
            }
        }
    }
    pairs.join("&")
}

/// 解析普通参数透传串，恢复名字到多值的有序映射
#[must_use]
pub fn decode_pass_through(encoded: &str) -> RequestParams {
    let mut params = RequestParams::new();
    for segment in encoded.split('&').filter(|segment| !segment.is_empty()) {
        let Some((name, value)) = form_urlencoded::parse(segment.as_bytes()).next() else {
            continue;
        };
        if segment.contains('=') {
            params.append(name.into_owned(), value.into_owned());
        } else {
            params.append_flag(name.into_owned());
        }
    }
    params
}

fn encode_component(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn identity() -> Identity {
        Identity::new("42")
            .with_attribute("uid", "jdoe")
            .with_attribute("mail", "j doe@example.org")
    }

    #[test]
    fn get_appends_to_query() {
        let request = ChannelRequest::get(
            RequestParams::new()
                .with("q", "a b")
                .with("tag", "x")
                .with("tag", "y")
                .with_flag("raw")
                .with(params::XML_URI, "http://ignored"),
        );
        let output = PassThroughEncoder::encode(
            "s1",
            "http://svc/search?lang=en",
            None,
            &PersonAllow::Unset,
            &identity(),
            &request,
        );
        assert_eq!(output.encoded, "q=a+b&tag=x&tag=y&raw");
        assert_eq!(output.full_uri, "http://svc/search?lang=en&q=a+b&tag=x&tag=y&raw");
        assert!(output.appended_to_uri);
        assert_eq!(output.body, None);
    }

    #[test]
    fn post_keeps_body() {
        let request = ChannelRequest::post(RequestParams::new().with("user", "jdoe"));
        let output = PassThroughEncoder::encode(
            "s1",
            "http://svc/login",
            None,
            &PersonAllow::Unset,
            &identity(),
            &request,
        );
        assert_eq!(output.full_uri, "http://svc/login");
        assert_eq!(output.body.as_deref(), Some("user=jdoe"));
        assert!(!output.appended_to_uri);
    }

    #[test]
    fn identity_attributes_follow_allow_policy() {
        let request = ChannelRequest::get(RequestParams::new());
        let allow = PersonAllow::parse("uid,mail");
        let output = PassThroughEncoder::encode(
            "s1",
            "http://svc/me",
            Some("uid, sn ,mail,nick"),
            &allow,
            &identity(),
            &request,
        );
        assert_eq!(output.encoded, "uid=jdoe&mail=j+doe%40example.org");

        let output = PassThroughEncoder::encode(
            "s1",
            "http://svc/me",
            Some("uid,mail"),
            &PersonAllow::DenyAll,
            &identity(),
            &request,
        );
        assert_eq!(output.encoded, "");
        assert_eq!(output.full_uri, "http://svc/me");
    }

    #[test]
    fn missing_attribute_value_is_sent_empty() {
        let request = ChannelRequest::get(RequestParams::new());
        let output = PassThroughEncoder::encode(
            "s1",
            "http://svc/me",
            Some("nick"),
            &PersonAllow::AllowAll,
            &identity(),
            &request,
        );
        assert_eq!(output.encoded, "nick=");
    }

    #[test]
    fn keywords_suppress_generic_params() {
        let request = ChannelRequest::get(RequestParams::new().with("q", "ignored"))
            .with_keywords("rust+proxy");
        let alone = PassThroughEncoder::encode(
            "s1",
            "http://svc/find",
            None,
            &PersonAllow::Unset,
            &identity(),
            &request,
        );
        assert_eq!(alone.encoded, "rust+proxy");

        let with_identity = PassThroughEncoder::encode(
            "s1",
            "http://svc/find",
            Some("uid"),
            &PersonAllow::AllowAll,
            &identity(),
            &request,
        );
        assert_eq!(with_identity.encoded, "uid=jdoe&keywords=rust+proxy");
    }

    #[test]
    fn decode_restores_order_and_flags() {
        let params = RequestParams::new()
            .with("b", "1 2")
            .with_flag("flag")
            .with("a", "")
            .with("b", "&=");
        let decoded = decode_pass_through(&encode_request_params(&params));
        assert_eq!(decoded, params);
    }
}
