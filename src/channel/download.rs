//! # 原始下载通道
//!
//! 绕过转换管线，直接把上游字节流交给调用方。依赖会话已有的 Cookie 上下文完成授权，
//! 例如代理登录之后的文件下载。
//!
//! `download_headers` 发起抓取并持有响应，`open_stream` 取走响应（只能取一次）。

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use tokio_util::sync::CancellationToken;

use crate::channel::fetch::FetchEngine;
use crate::channel::session::ChannelSession;
use crate::error::{ProxyError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lerror, linfo};

/// 下载文件名
pub const DOWNLOAD_NAME: &str = "proxyDL";

/// 下载字节流
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// 抓取当前资源并保留连接，返回上游响应头
pub async fn download_headers(
    engine: &FetchEngine,
    session: &mut ChannelSession,
    cancel: &CancellationToken,
) -> Result<HeaderMap> {
    let Some(uri) = session.target_uri().map(str::to_string) else {
        return Err(ProxyError::stream_unavailable("会话没有可下载的资源 URI"));
    };

    // 新的抓取替换尚未取走的旧连接
    session.conn_holder = None;
    let response = match engine.fetch(&uri, session, cancel).await {
        Ok(response) => response,
        Err(e) => {
            lerror!(
                session.uid,
                LogStage::Download,
                LogComponent::Download,
                "download_fetch_failed",
                "下载资源抓取失败",
                kind = e.kind().as_str(),
                uri = %uri,
                error = %e
            );
            return Err(e);
        }
    };

    let headers = response.headers().clone();
    linfo!(
        session.uid,
        LogStage::Download,
        LogComponent::Download,
        "download_ready",
        "下载连接已就绪",
        uri = %uri,
        status = response.status().as_u16(),
        header_count = headers.len()
    );
    session.conn_holder = Some(response);
    Ok(headers)
}

/// 持有响应的内容类型
#[must_use]
pub fn content_type(session: &ChannelSession) -> Option<String> {
    session
        .conn_holder
        .as_ref()?
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// 取走持有的响应并返回字节流；第二次调用会失败，直到再次抓取
///
/// 读取超时按两次读取之间的间隔计算，持续有数据到达的长下载不会被截断。
pub fn open_stream(engine: &FetchEngine, session: &mut ChannelSession) -> Result<ByteStream> {
    let response = session.conn_holder.take().ok_or_else(|| {
        ProxyError::stream_unavailable("下载流尚未打开或已被取走，需要重新获取响应头")
    })?;

    ldebug!(
        session.uid,
        LogStage::Download,
        LogComponent::Download,
        "stream_handed_over",
        "下载流移交给调用方",
        url = %response.url()
    );
    let engine = engine.clone();
    let url = response.url().clone();
    Ok(response
        .bytes_stream()
        .map(move |chunk| chunk.map_err(|e| engine.map_read_error(&url, e)))
        .boxed())
}

/// 不支持直接写出，调用方应使用字节流
pub fn download_data(session: &ChannelSession) -> Result<()> {
    Err(ProxyError::stream_unavailable(format!(
        "会话 {} 不支持 download_data，请使用 open_stream",
        session.uid
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::params::RequestParams;
    use crate::channel::types::Identity;
    use crate::config::ChannelDefaults;

    fn session() -> ChannelSession {
        ChannelSession::from_static("s1", Identity::new("7"), RequestParams::new(), &ChannelDefaults::default())
    }

    #[test]
    fn stream_requires_prior_fetch() {
        let engine = FetchEngine::new(crate::config::HttpClientConfig::default()).unwrap();
        let mut session = session();
        assert!(content_type(&session).is_none());
        assert!(matches!(
            open_stream(&engine, &mut session),
            Err(ProxyError::StreamUnavailable { .. })
        ));
        assert!(download_data(&session).is_err());
    }

    #[tokio::test]
    async fn headers_without_uri_fail() {
        let engine = FetchEngine::new(crate::config::HttpClientConfig::default()).unwrap();
        let mut session = session();
        let result = download_headers(&engine, &mut session, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ProxyError::StreamUnavailable { .. })));
    }
}
