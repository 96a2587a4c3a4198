//! # 渠道参数
//!
//! 参数名常量、请求方法与单次请求携带的运行时数据

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 资源 URI
pub const XML_URI: &str = "cw_xml";
/// 样式表列表 URI
pub const SSL_URI: &str = "cw_ssl";
/// 样式表标题
pub const XSL_TITLE: &str = "cw_xslTitle";
/// 显式样式表 URI
pub const XSL_URI: &str = "cw_xsl";
/// 透传模式
pub const PASS_THROUGH: &str = "cw_passThrough";
/// tidy 规范化开关
pub const TIDY: &str = "cw_tidy";
/// 关于页 URI
pub const INFO_URI: &str = "cw_info";
/// 帮助页 URI
pub const HELP_URI: &str = "cw_help";
/// 编辑页 URI
pub const EDIT_URI: &str = "cw_edit";
/// 默认缓存超时（秒）
pub const CACHE_DEFAULT_TIMEOUT: &str = "cw_cacheDefaultTimeout";
/// 默认缓存范围
pub const CACHE_DEFAULT_SCOPE: &str = "cw_cacheDefaultScope";
/// 默认缓存模式
pub const CACHE_DEFAULT_MODE: &str = "cw_cacheDefaultMode";
/// 本次请求的缓存超时
pub const CACHE_TIMEOUT: &str = "cw_cacheTimeout";
/// 本次请求的缓存范围
pub const CACHE_SCOPE: &str = "cw_cacheScope";
/// 本次请求的缓存模式
pub const CACHE_MODE: &str = "cw_cacheMode";
/// 需要转发的身份属性列表
pub const PERSON: &str = "cw_person";
/// 身份属性放行列表（仅静态）
pub const PERSON_ALLOW: &str = "cw_person_allow";
/// 本地连接上下文选择器（仅静态）
pub const LOCAL_CONN_CONTEXT: &str = "upc_localConnContext";
/// 一次性重置信号
pub const RESET: &str = "cw_reset";
/// 站内链接标记
pub const IN_CHANNEL_LINK: &str = "cw_inChannelLink";
/// 下载标记
pub const DOWNLOAD: &str = "cw_download";

/// 渠道保留的参数名前缀，带这些前缀的参数永远不会透传给上游
pub const RESERVED_PREFIXES: [&str; 2] = ["cw_", "upc_"];

/// 判断参数名是否为渠道保留参数
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// 终端请求的 HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
}

impl HttpMethod {
    /// 方法名
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 保持原始顺序的多值参数表
///
/// 空值列表表示不带值的参数（如 `?flag`）。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestParams {
    entries: IndexMap<String, Vec<String>>,
}

impl RequestParams {
    /// 空参数表
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个参数值，同名参数保留首次出现的位置
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.entry(name.into()).or_default().push(value.into());
    }

    /// 登记一个不带值的参数
    pub fn append_flag(&mut self, name: impl Into<String>) {
        self.entries.entry(name.into()).or_default();
    }

    /// 链式追加参数值
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.append(name, value);
        self
    }

    /// 链式登记无值参数
    #[must_use]
    pub fn with_flag(mut self, name: impl Into<String>) -> Self {
        self.append_flag(name);
        self
    }

    /// 替换参数的全部值
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(name.into(), vec![value.into()]);
    }

    /// 参数的第一个值；无值参数返回空串
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(name)
            .map(|values| values.first().map_or("", String::as_str))
    }

    /// 参数的全部值
    #[must_use]
    pub fn get_all(&self, name: &str) -> Option<&[String]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    /// 是否包含该参数
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// 按原始顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// 参数个数
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for RequestParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.append(name, value);
        }
        params
    }
}

/// 单次终端请求携带的运行时数据
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelRequest {
    /// 请求参数
    pub params: RequestParams,
    /// 终端请求方法
    pub method: HttpMethod,
    /// 关键字查询串（`?a+b` 形式的请求）
    pub keywords: Option<String>,
    /// 渠道自身的动作 URL
    pub base_action_url: Option<String>,
    /// 下载工作器 URL
    pub download_action_url: Option<String>,
    /// 浏览器信息（通常为 User-Agent），交给媒体类型与样式表解析
    pub browser_info: Option<String>,
}

impl ChannelRequest {
    /// 以给定参数创建 GET 请求
    #[must_use]
    pub fn get(params: RequestParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// 以给定参数创建 POST 请求
    #[must_use]
    pub fn post(params: RequestParams) -> Self {
        Self {
            params,
            method: HttpMethod::Post,
            ..Self::default()
        }
    }

    /// 设置关键字查询串
    #[must_use]
    pub fn with_keywords(mut self, keywords: impl Into<String>) -> Self {
        self.keywords = Some(keywords.into());
        self
    }

    /// 设置浏览器信息
    #[must_use]
    pub fn with_browser_info(mut self, browser_info: impl Into<String>) -> Self {
        self.browser_info = Some(browser_info.into());
        self
    }

    /// 参数的第一个值
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// 请求是否带有站内链接标记
    #[must_use]
    pub fn is_in_channel_link(&self) -> bool {
        self.params.contains(IN_CHANNEL_LINK)
    }

    /// 请求是否应由下载工作器处理
    #[must_use]
    pub fn is_download(&self) -> bool {
        self.params.contains(DOWNLOAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_keep_first_insertion_order() {
        let params = RequestParams::new()
            .with("b", "1")
            .with("a", "2")
            .with("b", "3")
            .with_flag("flag");

        let names: Vec<&str> = params.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["b", "a", "flag"]);
        assert_eq!(params.get_all("b").unwrap(), ["1".to_string(), "3".to_string()]);
        assert_eq!(params.get("flag"), Some(""));
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn reserved_prefixes() {
        assert!(is_reserved("cw_xml"));
        assert!(is_reserved("upc_localConnContext"));
        assert!(!is_reserved("query"));
        assert!(!is_reserved("cwx"));
    }

    #[test]
    fn request_markers() {
        let request = ChannelRequest::get(
            RequestParams::new()
                .with_flag(IN_CHANNEL_LINK)
                .with(DOWNLOAD, "1"),
        );
        assert!(request.is_in_channel_link());
        assert!(request.is_download());
        assert!(!ChannelRequest::default().is_download());
    }
}
