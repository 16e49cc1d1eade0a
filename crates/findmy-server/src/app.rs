use anyhow::{Context, Result};
use findmy_config::{AppConfig, BatterySource, SensorConfig};
use findmy_device::{
    BatterySensor, DeviceManager, FileStore, FixedLocation, KeyValueStore, LocationSensor,
    ManagerOptions, NoBattery, NoLocation, Relay, SyncSummary, SysfsBattery,
};
use findmy_relay::{
    RelayManager, TelegramConfig, TelegramRelay, WebhookConfig, WebhookRelay,
};
use std::sync::Arc;
use tracing::info;

/// 应用状态
///
/// 由配置组装存储、中继和设备管理器，守护进程和单次命令共用。
pub struct App {
    pub config: AppConfig,
    pub manager: Arc<DeviceManager>,
    pub relays: Arc<RelayManager>,
}

impl App {
    /// 按配置打开应用
    pub async fn open(config: AppConfig) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&config.storage.dir));
        let relays = Arc::new(build_relays(&config, store.clone())?);

        let options = ManagerOptions {
            device_name: config.device.name.clone(),
            merge_mode: config.registry.merge_mode,
            ingest_capacity: config.registry.ingest_capacity,
            relay_timeout: config.relay.timeout(),
        };
        let relay: Arc<dyn Relay> = relays.clone();
        let manager = DeviceManager::open(store, relay, options)
            .await
            .with_context(|| {
                format!("Failed to open device store at {}", config.storage.dir.display())
            })?;

        Ok(Self {
            config,
            manager: Arc::new(manager),
            relays,
        })
    }

    /// 拉取一次中继并合并到注册表
    pub async fn sync_once(&self) -> Result<SyncSummary> {
        let payloads = self.relays.fetch_all().await;
        Ok(self.manager.sync(payloads).await?)
    }

    /// 启动传感器
    pub async fn start_sensors(&self) {
        let (location, battery) = build_sensors(&self.config.sensors);
        self.manager
            .start_sensors(
                location,
                battery,
                self.config.sensors.poll_interval(),
                self.config.sensors.timeout(),
            )
            .await;
    }

    /// 关闭：停止传感器并刷新存储
    pub async fn shutdown(&self) -> Result<()> {
        self.manager
            .shutdown()
            .await
            .context("Failed to flush device registry")
    }
}

/// 按配置构建中继
///
/// Telegram 拉取端的 offset 保存在 `store` 中，单次同步之间不会重复处理消息。
pub fn build_relays(config: &AppConfig, store: Arc<dyn KeyValueStore>) -> Result<RelayManager> {
    let mut relays = RelayManager::new();
    let timeout = config.relay.timeout();

    if let Some(telegram) = &config.relay.telegram {
        let telegram = TelegramConfig {
            api_base: telegram.api_base.clone(),
            bot_token: telegram.bot_token.clone(),
            chat_id: telegram.chat_id.clone(),
        };
        // 发布与拉取各自持有客户端，拉取端维护 offset
        relays.register(Box::new(TelegramRelay::new(telegram.clone(), timeout)?));
        relays.register_source(Box::new(
            TelegramRelay::new(telegram, timeout)?.with_offset_store(store),
        ));
    }

    if let Some(webhook) = &config.relay.webhook {
        let webhook = WebhookConfig {
            url: webhook.url.clone(),
            headers: (!webhook.headers.is_empty()).then(|| webhook.headers.clone()),
        };
        relays.register(Box::new(WebhookRelay::new(webhook, timeout)?));
    }

    if relays.relay_count() == 0 {
        info!("No relay configured, self record stays local");
    }
    Ok(relays)
}

/// 按配置构建传感器
pub fn build_sensors(config: &SensorConfig) -> (Arc<dyn LocationSensor>, Arc<dyn BatterySensor>) {
    let location: Arc<dyn LocationSensor> = match config.location {
        Some(location) => Arc::new(FixedLocation::new(location)),
        None => Arc::new(NoLocation),
    };
    let battery: Arc<dyn BatterySensor> = match config.battery {
        BatterySource::Sysfs => Arc::new(SysfsBattery::new(&config.sysfs_root)),
        BatterySource::Disabled => Arc::new(NoBattery),
    };
    (location, battery)
}
