//! # 配置管理器
//!
//! 统一的配置加载接口：配置文件 + 环境变量覆盖

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::AppConfig;
use crate::channel::types::{CacheMode, CacheScope};
use crate::error::{ProxyError, Result};

/// 环境变量前缀
const ENV_PREFIX: &str = "WEB_PROXY_";
/// 指定配置文件路径的环境变量
const CONFIG_PATH_ENV: &str = "WEB_PROXY_CONFIG_PATH";

/// 配置管理器
#[derive(Debug, Clone)]
pub struct ConfigManager {
    /// 当前配置
    config: AppConfig,
    /// 已应用的环境变量覆盖
    env_overrides: HashMap<String, String>,
}

impl ConfigManager {
    /// 创建配置管理器
    pub fn new() -> Result<Self> {
        // 优先使用环境变量指定的配置文件路径
        let config_file = if let Ok(path) = env::var(CONFIG_PATH_ENV) {
            path
        } else {
            let env = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
            format!("config/config.{env}.toml")
        };

        Self::from_file(&config_file)
    }

    /// 从指定文件创建配置管理器
    pub fn from_file(config_path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::load_config_file(config_path.as_ref())?;
        Self::with_overrides(config, Self::build_env_overrides())
    }

    /// 直接使用内存中的配置（不读取环境变量）
    pub fn from_config(config: AppConfig) -> Result<Self> {
        Self::with_overrides(config, HashMap::new())
    }

    /// 在配置上应用给定的覆盖映射并校验
    pub fn with_overrides(
        mut config: AppConfig,
        env_overrides: HashMap<String, String>,
    ) -> Result<Self> {
        Self::apply_env_overrides(&mut config, &env_overrides)?;
        config.validate()?;

        info!("配置管理器初始化完成");
        info!("- 环境变量覆盖: {} 个", env_overrides.len());

        Ok(Self {
            config,
            env_overrides,
        })
    }

    /// 获取当前配置
    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 获取当前配置的副本
    #[must_use]
    pub fn get_config(&self) -> AppConfig {
        self.config.clone()
    }

    /// 已生效的覆盖数量
    #[must_use]
    pub fn override_count(&self) -> usize {
        self.env_overrides.len()
    }

    /// 加载配置文件
    fn load_config_file(path: &Path) -> Result<AppConfig> {
        if !path.exists() {
            return Err(ProxyError::config(format!(
                "配置文件不存在: {}",
                path.display()
            )));
        }

        let config_content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config_with_source(format!("读取配置文件失败: {}", path.display()), e)
        })?;

        toml::from_str(&config_content).map_err(|e| {
            ProxyError::config_with_source(
                format!("TOML解析失败 - 配置文件: {}, 详细错误: {e}", path.display()),
                e,
            )
        })
    }

    /// 构建环境变量覆盖映射
    fn build_env_overrides() -> HashMap<String, String> {
        let mut overrides = HashMap::new();

        // 例如: WEB_PROXY_HTTP_MAX_REDIRECTS -> http.max_redirects
        for (key, value) in env::vars() {
            if key == CONFIG_PATH_ENV {
                continue;
            }
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                let lowered = config_key.to_lowercase();
                if let Some((section, field)) = lowered.split_once('_') {
                    overrides.insert(format!("{section}.{field}"), value);
                }
            }
        }

        debug!("发现 {} 个环境变量覆盖", overrides.len());
        overrides
    }

    /// 应用环境变量覆盖
    fn apply_env_overrides(config: &mut AppConfig, overrides: &HashMap<String, String>) -> Result<()> {
        for (path, value) in overrides {
            debug!("应用环境变量覆盖: {} = {}", path, value);
            Self::apply_override_to_config(config, path, value)?;
        }
        Ok(())
    }

    /// 将单个覆盖应用到配置对象
    fn apply_override_to_config(config: &mut AppConfig, path: &str, value: &str) -> Result<()> {
        match path {
            "http.connect_timeout_secs" => {
                config.http.connect_timeout_secs = parse_value(path, value)?;
            }
            "http.read_timeout_secs" => config.http.read_timeout_secs = parse_value(path, value)?,
            "http.max_redirects" => config.http.max_redirects = parse_value(path, value)?,
            "http.user_agent" => config.http.user_agent = value.to_string(),
            "channel.cache_default_timeout" => {
                config.channel.cache_default_timeout = parse_value(path, value)?;
            }
            "channel.cache_default_scope" => {
                config.channel.cache_default_scope = CacheScope::from_str(value)?;
            }
            "channel.cache_default_mode" => {
                config.channel.cache_default_mode = CacheMode::from_str(value)?;
            }
            "channel.person_allow" => config.channel.person_allow = Some(value.to_string()),
            _ => {
                warn!("未知的配置路径，忽略环境变量覆盖: {}", path);
            }
        }

        Ok(())
    }
}

fn parse_value<T>(path: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .map_err(|e| ProxyError::config_with_source(format!("无效的配置值 {path}: {value}"), e))
}
