//! # Web Proxy 命令行
//!
//! 以单个会话驱动内容代理渠道：加载配置、建立会话、合并运行时参数，
//! 然后输出渲染输入或原始下载流。

use clap::Parser;
use futures::StreamExt;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use web_proxy::{
    AppConfig, ChannelEvent, ChannelRequest, Identity, ProxyError, RequestParams, Result,
    WebProxyChannel,
    channel::{ChannelCacheKey, HttpMethod, IdentityNormalizer, params},
    config::ConfigManager,
    error::Context,
    lerror, linfo, lwarn,
    logging::{self, LogComponent, LogStage},
};

/// 按会话代理远端 XML/HTML 资源
#[derive(Parser, Debug)]
#[command(name = "web-proxy", version, about)]
struct Args {
    /// 配置文件路径（缺省时按 WEB_PROXY_CONFIG_PATH / RUST_ENV 查找）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 资源 URI（cw_xml）
    #[arg(long)]
    url: String,

    /// 运行时请求参数，可重复：--param q=rust
    #[arg(long = "param", value_parser = parse_key_value)]
    params: Vec<(String, String)>,

    /// 静态渠道参数，可重复：--static cw_cacheDefaultMode=all
    #[arg(long = "static", value_parser = parse_key_value)]
    static_params: Vec<(String, String)>,

    /// 终端请求方法
    #[arg(long, default_value = "GET", value_parser = parse_method)]
    method: HttpMethod,

    /// 走原始下载通道，把字节流写到标准输出
    #[arg(long)]
    download: bool,

    /// 只输出缓存键（JSON），不抓取资源
    #[arg(long, conflicts_with = "download")]
    key_only: bool,

    /// 日志级别（error, warn, info, debug, trace）
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .ok_or_else(|| format!("参数格式应为 key=value: {raw}"))
}

fn parse_method(raw: &str) -> std::result::Result<HttpMethod, String> {
    match raw.to_ascii_uppercase().as_str() {
        "GET" => Ok(HttpMethod::Get),
        "POST" => Ok(HttpMethod::Post),
        other => Err(format!("不支持的请求方法: {other}")),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    if let Some(path) = path {
        return ConfigManager::from_file(path)
            .map(|manager| manager.get_config())
            .with_context(|| format!("无法加载配置文件 {}", path.display()));
    }
    match ConfigManager::new() {
        Ok(manager) => Ok(manager.get_config()),
        Err(e) => {
            lwarn!(
                "system",
                LogStage::Startup,
                LogComponent::Configuration,
                "config_fallback",
                "未找到配置文件，使用内置默认值",
                error = %e
            );
            ConfigManager::from_config(AppConfig::default()).map(|manager| manager.get_config())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logging(Some(&args.log_level));

    let config = load_config(args.config.as_ref())?;
    let channel = WebProxyChannel::new(&config)?;
    let uid = uuid::Uuid::new_v4().to_string();

    let mut static_params = RequestParams::new()
        .with(params::XML_URI, args.url.as_str())
        .with(params::PASS_THROUGH, "all");
    for (key, value) in &args.static_params {
        static_params.set(key.as_str(), value.as_str());
    }
    channel.set_static_data(&uid, Identity::new(whoami()), static_params);

    let mut request = ChannelRequest::get(args.params.iter().cloned().collect());
    request.method = args.method;
    if args.download {
        request.params.append_flag(params::DOWNLOAD);
    }
    channel.set_runtime_data(&uid, request).await;

    let key = channel.generate_key(&uid).await;
    if let Some(key) = &key {
        linfo!(
            uid,
            LogStage::CacheDecision,
            LogComponent::Main,
            "cache_key",
            "本次请求的缓存键",
            key = %key
        );
    }

    let outcome = if args.key_only {
        print_key(key.as_ref()).await
    } else if args.download {
        download(&channel, &uid).await
    } else {
        render(&channel, &uid).await
    };

    channel.receive_event(&uid, ChannelEvent::SessionDone).await;
    if let Err(e) = &outcome {
        lerror!(
            uid,
            LogStage::Error,
            LogComponent::Main,
            "request_failed",
            "请求处理失败",
            kind = e.kind().as_str(),
            error = %e
        );
    }
    outcome
}

async fn print_key(key: Option<&ChannelCacheKey>) -> Result<()> {
    let mut json = serde_json::to_string_pretty(&key)?;
    json.push('\n');
    let mut stdout = tokio::io::stdout();
    stdout.write_all(json.as_bytes()).await.context("写入标准输出失败")?;
    stdout.flush().await?;
    Ok(())
}

async fn render(channel: &WebProxyChannel, uid: &str) -> Result<()> {
    let payload = channel
        .render(uid, &IdentityNormalizer)
        .await?
        .ok_or_else(|| ProxyError::missing_session(uid))?;

    linfo!(
        uid,
        LogStage::Render,
        LogComponent::Main,
        "render_complete",
        "渲染输入已就绪",
        mime_type = %payload.mime_type,
        stylesheet = ?payload.stylesheet
    );
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(payload.document.as_str().as_bytes())
        .await
        .context("写入标准输出失败")?;
    stdout.flush().await?;
    Ok(())
}

async fn download(channel: &WebProxyChannel, uid: &str) -> Result<()> {
    let headers = channel.download_headers(uid).await?;
    let content_type = channel.content_type(uid).await;
    linfo!(
        uid,
        LogStage::Download,
        LogComponent::Main,
        "download_headers",
        "下载响应头",
        name = channel.download_name(uid),
        content_type = ?content_type,
        header_count = headers.len()
    );

    let mut stream = channel.open_stream(uid).await?;
    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = stream.next().await {
        stdout.write_all(&chunk?).await.context("写入标准输出失败")?;
    }
    stdout.flush().await?;
    Ok(())
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "anonymous".to_string())
}
