//! # 配置管理模块
//!
//! 处理应用配置加载、验证和环境变量覆盖

mod app_config;
mod manager;

pub use app_config::{AppConfig, ChannelDefaults, HttpClientConfig};
pub use manager::ConfigManager;

/// 按默认规则加载配置（`WEB_PROXY_CONFIG_PATH` 或 `config/config.{RUST_ENV}.toml`）
pub fn load_config() -> crate::error::Result<AppConfig> {
    ConfigManager::new().map(|manager| manager.get_config())
}
