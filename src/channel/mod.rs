//! # 内容代理渠道
//!
//! 按会话抓取远端 XML/HTML 资源：管理 Cookie 与重定向、决定是否缓存、
//! 把抓取结果交给转换管线或作为原始字节流下载。
//!
//! ## 数据流
//! ```text
//! SessionRegistry -> ParameterResolver -> CacheKeyEngine (是否需要抓取)
//!                                      -> FetchEngine <-> CookieJar
//!                                           ^ PassThroughEncoder
//!                                      -> render / download
//! ```

pub mod cache;
pub mod context;
pub mod cookies;
pub mod download;
pub mod fetch;
pub mod params;
pub mod passthrough;
pub mod registry;
pub mod render;
pub mod resolver;
pub mod service;
pub mod session;
pub mod types;

pub use cache::{
    CacheKeyEngine, CacheValidity, ChannelCacheKey, StaticStylesheetResolver, StylesheetResolver,
};
pub use context::{ConnectionContextRegistry, LocalConnectionContext, OutgoingRequest};
pub use cookies::{CookieCoordinates, CookieJar};
pub use download::{ByteStream, DOWNLOAD_NAME};
pub use fetch::FetchEngine;
pub use params::{ChannelRequest, HttpMethod, RequestParams};
pub use passthrough::{PassThroughEncoder, PassThroughOutput, decode_pass_through, encode_request_params};
pub use registry::{SessionHandle, SessionRegistry};
pub use render::{
    DefaultMediaResolver, IdentityNormalizer, MarkupNormalizer, MediaResolver, RenderDocument,
    RenderPayload, StylesheetSelection,
};
pub use resolver::{ChannelEvent, ParameterResolver};
pub use service::{RuntimeProperties, WebProxyChannel};
pub use session::{CacheOverrides, CacheSettings, ChannelSession};
pub use types::{CacheMode, CacheScope, Identity, PassThroughMode, PersonAllow};
