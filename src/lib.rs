//! # Web Proxy Channel Library
//!
//! 按会话代理远端内容的渠道核心库：Cookie 作用域内的抓取、重定向跟随、
//! 请求参数透传、缓存键与有效性判定，以及原始下载通道。

pub mod channel;
pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use channel::{ChannelEvent, ChannelRequest, Identity, RequestParams, WebProxyChannel};
pub use config::AppConfig;
pub use error::{ProxyError, Result};
