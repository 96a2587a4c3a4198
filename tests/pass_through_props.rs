//! # 透传与缓存范围的性质测试

use proptest::prelude::*;

use web_proxy::channel::{
    CacheScope, ChannelSession, ParameterResolver, PassThroughEncoder, PersonAllow,
    decode_pass_through, encode_request_params, params,
};
use web_proxy::config::ChannelDefaults;
use web_proxy::{ChannelRequest, Identity, RequestParams};

fn param_name() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_ .%&=+-]{0,10}".prop_filter("reserved prefix", |name| !params::is_reserved(name))
}

fn param_values() -> impl Strategy<Value = Vec<String>> {
    prop_oneof![
        Just(Vec::new()),
        prop::collection::vec(".{0,12}", 1..4),
    ]
}

fn scope() -> impl Strategy<Value = CacheScope> {
    prop_oneof![
        Just(CacheScope::Instance),
        Just(CacheScope::User),
        Just(CacheScope::System),
    ]
}

proptest! {
    #[test]
    fn generic_params_round_trip(entries in prop::collection::vec((param_name(), param_values()), 0..8)) {
        let mut original = RequestParams::new();
        for (name, values) in entries {
            if values.is_empty() {
                original.append_flag(name);
            } else {
                for value in values {
                    original.append(name.clone(), value);
                }
            }
        }

        let decoded = decode_pass_through(&encode_request_params(&original));
        prop_assert_eq!(decoded, original);
    }

    #[test]
    fn deny_all_never_forwards_identity(names in prop::collection::vec("[a-z]{1,8}", 0..6)) {
        let mut identity = Identity::new("42");
        for name in &names {
            identity = identity.with_attribute(name.clone(), "secret");
        }
        let person = names.join(",");

        let output = PassThroughEncoder::encode(
            "prop",
            "http://svc/me",
            Some(&person),
            &PersonAllow::DenyAll,
            &identity,
            &ChannelRequest::default(),
        );
        prop_assert_eq!(output.encoded, "");
        prop_assert_eq!(output.full_uri, "http://svc/me");
    }

    #[test]
    fn effective_scope_never_exceeds_default(
        default in scope(),
        requests in prop::collection::vec((prop::option::of(scope()), prop::option::of(scope())), 1..6),
    ) {
        let static_params = RequestParams::new().with(params::CACHE_DEFAULT_SCOPE, default.as_str());
        let mut session = ChannelSession::from_static(
            "prop",
            Identity::new("42"),
            static_params,
            &ChannelDefaults::default(),
        );

        for (default_override, scope_override) in requests {
            let mut request = RequestParams::new();
            if let Some(scope) = default_override {
                request.append(params::CACHE_DEFAULT_SCOPE, scope.as_str());
            }
            if let Some(scope) = scope_override {
                request.append(params::CACHE_SCOPE, scope.as_str());
            }
            ParameterResolver::resolve(&mut session, ChannelRequest::get(request));

            prop_assert!(session.cache.scope() <= session.cache.default_scope());
            prop_assert!(session.cache.default_scope() <= default);
        }
    }
}
