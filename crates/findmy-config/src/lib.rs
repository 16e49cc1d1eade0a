pub mod global;
pub mod loader;

pub use global::{
    AppConfig, BatterySource, DeviceConfig, LoggingConfig, RegistryConfig, RelayConfig,
    SensorConfig, StorageConfig, TelegramRelayConfig, WebhookRelayConfig,
};
pub use loader::{ConfigLoader, CONFIG_FILE, ENV_PREFIX};
