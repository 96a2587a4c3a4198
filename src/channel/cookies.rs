//! # Cookie 存储
//!
//! 按 (域名, 路径, 端口) 坐标保存上游下发的 Cookie，并在同坐标的后续请求中回放。
//! 不做 RFC 6265 的域/路径前缀匹配，坐标必须完全一致。

use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use url::Url;

/// Cookie 的存储坐标
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CookieCoordinates {
    /// 主机名（小写）
    pub domain: String,
    /// 资源所在目录
    pub path: String,
    /// 端口（缺省时取协议默认端口）
    pub port: u16,
}

impl CookieCoordinates {
    /// 从 URL 解析坐标；没有主机或端口无法确定时返回 `None`
    #[must_use]
    pub fn from_url(url: &Url) -> Option<Self> {
        let domain = url.host_str()?.trim().to_ascii_lowercase();
        let port = url.port_or_known_default()?;
        Some(Self {
            domain,
            path: directory_of(url.path()),
            port,
        })
    }
}

impl fmt::Display for CookieCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.domain, self.port, self.path)
    }
}

/// `/a/b/c.xml` -> `/a/b`，根目录下的资源归到 `/`
fn directory_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// 会话私有的 Cookie 存储
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    entries: HashMap<CookieCoordinates, IndexMap<String, String>>,
}

impl CookieJar {
    /// 空存储
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否已保存任何 Cookie
    #[must_use]
    pub fn cookies_exist(&self) -> bool {
        self.entries.values().any(|cookies| !cookies.is_empty())
    }

    /// 保存一组 `Set-Cookie` 响应头，同名 Cookie 覆盖旧值；返回实际保存的个数
    pub fn store<'a, I>(&mut self, coordinates: &CookieCoordinates, set_cookie_headers: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut stored = 0;
        for header in set_cookie_headers {
            let Some((name, value)) = parse_set_cookie(header) else {
                continue;
            };
            self.entries
                .entry(coordinates.clone())
                .or_default()
                .insert(name, value);
            stored += 1;
        }
        stored
    }

    /// 该坐标下应回放的 `Cookie` 请求头
    #[must_use]
    pub fn header_for(&self, coordinates: &CookieCoordinates) -> Option<String> {
        let cookies = self.entries.get(coordinates)?;
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// 读取单个 Cookie 值
    #[must_use]
    pub fn get(&self, coordinates: &CookieCoordinates, name: &str) -> Option<&str> {
        self.entries
            .get(coordinates)
            .and_then(|cookies| cookies.get(name))
            .map(String::as_str)
    }

    /// 已保存的坐标数
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

/// 取 `Set-Cookie` 的 `name=value` 段，忽略属性
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().trim_matches('"').to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coords(url: &str) -> CookieCoordinates {
        CookieCoordinates::from_url(&Url::parse(url).unwrap()).unwrap()
    }

    #[test]
    fn coordinates_use_directory_and_default_port() {
        let c = coords("http://Svc.Example.org/app/portal/data.xml?x=1");
        assert_eq!(c.domain, "svc.example.org");
        assert_eq!(c.path, "/app/portal");
        assert_eq!(c.port, 80);

        assert_eq!(coords("https://svc/data.xml").path, "/");
        assert_eq!(coords("https://svc/data.xml").port, 443);
        assert_eq!(coords("http://svc:8080/a/").path, "/a");
    }

    #[test]
    fn store_and_replay_by_exact_coordinates() {
        let mut jar = CookieJar::new();
        let here = coords("http://svc/app/login");
        let stored = jar.store(
            &here,
            ["JSESSIONID=abc; Path=/app; HttpOnly", "theme=dark", "garbage"],
        );
        assert_eq!(stored, 2);
        assert!(jar.cookies_exist());
        assert_eq!(jar.header_for(&here).as_deref(), Some("JSESSIONID=abc; theme=dark"));

        // 同目录下其他资源共享坐标
        assert!(jar.header_for(&coords("http://svc/app/home")).is_some());
        // 端口或目录不同则不回放
        assert!(jar.header_for(&coords("http://svc:8080/app/home")).is_none());
        assert!(jar.header_for(&coords("http://svc/other/home")).is_none());
    }

    #[test]
    fn later_cookie_replaces_same_name() {
        let mut jar = CookieJar::new();
        let here = coords("http://svc/app/login");
        jar.store(&here, ["sid=1"]);
        jar.store(&here, ["sid=2; Secure"]);
        assert_eq!(jar.get(&here, "sid"), Some("2"));
        assert_eq!(jar.len(), 1);
    }
}
