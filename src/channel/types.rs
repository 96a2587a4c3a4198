//! # 渠道领域类型
//!
//! 缓存范围/模式、透传模式、身份属性放行策略与身份信息

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::ProxyError;

/// 缓存共享范围
///
/// 声明顺序即限制程度的全序：`Instance < User < System`，越靠前共享越窄。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheScope {
    /// 仅当前渠道实例
    Instance,
    /// 每个身份一份
    User,
    /// 全系统共享
    System,
}

impl CacheScope {
    /// 配置值字符串
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::User => "user",
            Self::System => "system",
        }
    }

    /// `other` 是否不比当前范围更宽
    #[must_use]
    pub fn permits(self, other: Self) -> bool {
        other <= self
    }
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheScope {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instance" => Ok(Self::Instance),
            "user" => Ok(Self::User),
            "system" => Ok(Self::System),
            other => Err(ProxyError::config(format!("未知的缓存范围: {other}"))),
        }
    }
}

/// 缓存模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// 不缓存
    None,
    /// 遵循 HTTP 缓存指令；目前按 `All` 处理，仅使用超时判定
    Http,
    /// 缓存全部结果
    All,
}

impl CacheMode {
    /// 配置值字符串
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Http => "http",
            Self::All => "all",
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheMode {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "http" => Ok(Self::Http),
            "all" => Ok(Self::All),
            other => Err(ProxyError::config(format!("未知的缓存模式: {other}"))),
        }
    }
}

/// 请求参数透传模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassThroughMode {
    /// 不透传
    #[default]
    None,
    /// 仅在请求带有 `cw_inChannelLink` 标记时透传
    Marked,
    /// 透传，并由样式表保留应用内链接
    Application,
    /// 透传，并由样式表保留全部链接
    All,
}

impl PassThroughMode {
    /// 配置值字符串
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Marked => "marked",
            Self::Application => "application",
            Self::All => "all",
        }
    }

    /// 解析配置值；`none`/`application`/`all` 以外的值都按标记门控处理
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Self::None,
            "application" => Self::Application,
            "all" => Self::All,
            _ => Self::Marked,
        }
    }

    /// 在给定是否带有站内链接标记的情况下，是否应进行透传
    #[must_use]
    pub const fn triggers(self, in_channel_link: bool) -> bool {
        match self {
            Self::None => false,
            Self::Application | Self::All => true,
            Self::Marked => in_channel_link,
        }
    }
}

impl fmt::Display for PassThroughMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 身份属性放行策略
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PersonAllow {
    /// 未配置：不放行任何属性
    #[default]
    Unset,
    /// `*`：放行全部属性
    AllowAll,
    /// `!*`：拒绝全部属性
    DenyAll,
    /// 逗号分隔的允许列表
    Listed(HashSet<String>),
}

impl PersonAllow {
    /// 解析放行策略；空串视为未配置
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        match trimmed {
            "" => Self::Unset,
            "*" => Self::AllowAll,
            "!*" => Self::DenyAll,
            list => Self::Listed(
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
        }
    }

    /// 属性是否允许转发
    #[must_use]
    pub fn allows(&self, name: &str) -> bool {
        match self {
            Self::AllowAll => true,
            Self::Listed(names) => names.contains(name),
            Self::Unset | Self::DenyAll => false,
        }
    }

    /// 是否完全禁止属性转发（此时连请求的属性名都不会被检查）
    #[must_use]
    pub const fn forbids_all(&self) -> bool {
        matches!(self, Self::Unset | Self::DenyAll)
    }
}

/// 发起请求的终端用户身份
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// 身份标识，用于 `user` 范围的缓存键
    pub id: String,
    /// 身份属性；多值属性仅转发第一个值
    #[serde(default)]
    pub attributes: HashMap<String, Vec<String>>,
}

impl Identity {
    /// 创建不带属性的身份
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: HashMap::new(),
        }
    }

    /// 追加一个属性值
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.entry(name.into()).or_default().push(value.into());
        self
    }

    /// 属性的第一个值
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_order_is_instance_user_system() {
        assert!(CacheScope::Instance < CacheScope::User);
        assert!(CacheScope::User < CacheScope::System);
        assert!(CacheScope::User.permits(CacheScope::Instance));
        assert!(CacheScope::User.permits(CacheScope::User));
        assert!(!CacheScope::User.permits(CacheScope::System));
        assert!(!CacheScope::Instance.permits(CacheScope::User));
    }

    #[test]
    fn scope_and_mode_parse_case_insensitively() {
        assert_eq!("SYSTEM".parse::<CacheScope>().unwrap(), CacheScope::System);
        assert_eq!(" http ".parse::<CacheMode>().unwrap(), CacheMode::Http);
        assert!("guest".parse::<CacheScope>().is_err());
        assert!("init".parse::<CacheMode>().is_err());
    }

    #[test]
    fn pass_through_trigger_rules() {
        assert!(!PassThroughMode::None.triggers(true));
        assert!(PassThroughMode::All.triggers(false));
        assert!(PassThroughMode::Application.triggers(false));
        assert!(!PassThroughMode::Marked.triggers(false));
        assert!(PassThroughMode::Marked.triggers(true));
        assert_eq!(PassThroughMode::parse("whatever"), PassThroughMode::Marked);
    }

    #[test]
    fn person_allow_policies() {
        assert_eq!(PersonAllow::parse("  "), PersonAllow::Unset);
        assert_eq!(PersonAllow::parse("!*"), PersonAllow::DenyAll);
        assert!(PersonAllow::parse("*").allows("anything"));

        let listed = PersonAllow::parse("uid, mail ,,");
        assert!(listed.allows("uid"));
        assert!(listed.allows("mail"));
        assert!(!listed.allows("sn"));
        assert!(PersonAllow::DenyAll.forbids_all());
    }

    #[test]
    fn identity_returns_first_attribute_value() {
        let identity = Identity::new("42")
            .with_attribute("mail", "a@example.org")
            .with_attribute("mail", "b@example.org");
        assert_eq!(identity.attribute("mail"), Some("a@example.org"));
        assert_eq!(identity.attribute("sn"), None);
    }
}
