//! # 响应体读取超时测试
//!
//! 上游用原始 TCP 逐字节写出响应体，验证读取超时按两次读取的间隔计算，
//! 以及响应体停滞时报告为 `ReadTimeout`

use std::time::{Duration, Instant};

use futures::StreamExt;
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use web_proxy::channel::{IdentityNormalizer, params};
use web_proxy::config::HttpClientConfig;
use web_proxy::{AppConfig, ChannelRequest, Identity, ProxyError, RequestParams, WebProxyChannel};

const BODY_LEN: usize = 6;

/// 启动只服务一个连接的上游：先写响应头，再按 `(等待, 字节)` 依次写出响应体
async fn trickling_upstream(chunks: Vec<(Duration, &'static [u8])>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 4096];
        let _ = socket.read(&mut request).await;
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {BODY_LEN}\r\n\r\n"
        );
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        for (pause, bytes) in chunks {
            tokio::time::sleep(pause).await;
            if socket.write_all(bytes).await.is_err() || socket.flush().await.is_err() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    });
    format!("http://{addr}/files/report.bin")
}

fn channel_with_read_timeout(secs: u64) -> WebProxyChannel {
    let config = AppConfig {
        http: HttpClientConfig {
            read_timeout_secs: secs,
            ..HttpClientConfig::default()
        },
        ..AppConfig::default()
    };
    WebProxyChannel::new(&config).unwrap()
}

async fn open_session(channel: &WebProxyChannel, uri: &str) {
    channel.set_static_data(
        "s1",
        Identity::new("42"),
        [(params::XML_URI, uri)].into_iter().collect(),
    );
    channel
        .set_runtime_data("s1", ChannelRequest::get(RequestParams::new().with_flag(params::DOWNLOAD)))
        .await;
}

#[tokio::test]
async fn slow_but_steady_download_is_not_cut_off() {
    let pause = Duration::from_millis(400);
    let uri = trickling_upstream(
        [b"a", b"b", b"c", b"d", b"e", b"f"]
            .into_iter()
            .map(|byte| (pause, byte.as_slice()))
            .collect(),
    )
    .await;
    let channel = channel_with_read_timeout(1);
    open_session(&channel, &uri).await;

    let started = Instant::now();
    channel.download_headers("s1").await.unwrap();
    let mut stream = channel.open_stream("s1").await.unwrap();
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk.unwrap());
    }

    assert_eq!(body, b"abcdef");
    // 整体传输时长超过读取超时，但每次等待都短于它
    assert!(started.elapsed() > Duration::from_secs(2));
}

#[tokio::test]
async fn stalled_download_reports_read_timeout() {
    let uri = trickling_upstream(vec![
        (Duration::ZERO, b"ab".as_slice()),
        (Duration::from_secs(3), b"cdef".as_slice()),
    ])
    .await;
    let channel = channel_with_read_timeout(1);
    open_session(&channel, &uri).await;

    channel.download_headers("s1").await.unwrap();
    let mut stream = channel.open_stream("s1").await.unwrap();
    let mut received = Vec::new();
    let failure = loop {
        match stream.next().await {
            Some(Ok(chunk)) => received.extend_from_slice(&chunk),
            Some(Err(e)) => break e,
            None => panic!("stream ended without error after {received:?}"),
        }
    };

    assert_eq!(received, b"ab");
    assert!(
        matches!(failure, ProxyError::ReadTimeout { timeout_seconds: 1, .. }),
        "unexpected error: {failure:?}"
    );
}

#[tokio::test]
async fn stalled_render_wraps_read_timeout() {
    let uri = trickling_upstream(vec![
        (Duration::ZERO, b"<p>".as_slice()),
        (Duration::from_secs(3), b"hi>".as_slice()),
    ])
    .await;
    let channel = channel_with_read_timeout(1);
    open_session(&channel, &uri).await;

    let err = channel.render("s1", &IdentityNormalizer).await.unwrap_err();
    match err {
        ProxyError::Rendering {
            recoverable,
            source: Some(source),
            ..
        } => {
            assert!(recoverable);
            assert!(
                matches!(*source, ProxyError::ReadTimeout { timeout_seconds: 1, .. }),
                "unexpected source: {source:?}"
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
