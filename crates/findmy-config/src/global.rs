use anyhow::{anyhow, Result};
use findmy_device::{Location, MergeMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// 应用配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub storage: StorageConfig,
    pub registry: RegistryConfig,
    pub sensors: SensorConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

/// 本机设备配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "My Device".to_string(),
        }
    }
}

/// 存储配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data"),
        }
    }
}

/// 注册表配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub merge_mode: MergeMode,
    pub ingest_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            merge_mode: MergeMode::Replace,
            ingest_capacity: 256,
        }
    }
}

/// 电量来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatterySource {
    /// Linux sysfs
    #[default]
    Sysfs,
    /// 不读取电量
    #[serde(rename = "none")]
    Disabled,
}

/// 传感器配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SensorConfig {
    /// 轮询间隔（秒）
    pub poll_interval_secs: u64,

    /// 单次读取超时（秒）
    pub timeout_secs: u64,

    pub battery: BatterySource,

    pub sysfs_root: PathBuf,

    /// 固定位置，未设置时位置不可用
    pub location: Option<Location>,
}

impl SensorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            timeout_secs: 10,
            battery: BatterySource::Sysfs,
            sysfs_root: PathBuf::from("/sys/class/power_supply"),
            location: None,
        }
    }
}

/// 中继配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// 请求超时（秒）
    pub timeout_secs: u64,

    /// 定期拉取间隔（秒），0 表示不定期拉取
    pub sync_interval_secs: u64,

    pub telegram: Option<TelegramRelayConfig>,

    pub webhook: Option<WebhookRelayConfig>,
}

impl RelayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// 定期拉取间隔，未启用时为 `None`
    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync_interval_secs > 0).then(|| Duration::from_secs(self.sync_interval_secs))
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            sync_interval_secs: 300,
            telegram: None,
            webhook: None,
        }
    }
}

/// Telegram 中继配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelegramRelayConfig {
    pub api_base: String,
    pub bot_token: String,
    pub chat_id: String,
}

impl Default for TelegramRelayConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            bot_token: String::new(),
            chat_id: String::new(),
        }
    }
}

/// Webhook 中继配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookRelayConfig {
    pub url: String,
    pub headers: HashMap<String, String>,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 默认过滤级别，`RUST_LOG` 优先
    pub level: String,

    /// 输出 JSON 格式日志
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.sensors.poll_interval_secs == 0 {
            return Err(anyhow!("sensors.poll_interval_secs must be greater than 0"));
        }

        if self.sensors.timeout_secs == 0 {
            return Err(anyhow!("sensors.timeout_secs must be greater than 0"));
        }

        if self.relay.timeout_secs == 0 {
            return Err(anyhow!("relay.timeout_secs must be greater than 0"));
        }

        if self.registry.ingest_capacity == 0 {
            return Err(anyhow!("registry.ingest_capacity must be greater than 0"));
        }

        if let Some(location) = &self.sensors.location {
            if !location.is_valid() {
                return Err(anyhow!(
                    "sensors.location ({}, {}) is out of range",
                    location.lat,
                    location.lng
                ));
            }
        }

        if let Some(telegram) = &self.relay.telegram {
            if telegram.bot_token.trim().is_empty() {
                return Err(anyhow!("relay.telegram.bot_token must not be empty"));
            }
            if telegram.chat_id.trim().is_empty() {
                return Err(anyhow!("relay.telegram.chat_id must not be empty"));
            }
        }

        if let Some(webhook) = &self.relay.webhook {
            if webhook.url.trim().is_empty() {
                return Err(anyhow!("relay.webhook.url must not be empty"));
            }
        }

        Ok(())
    }

    /// 渲染为 TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
