use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::codec;
use crate::ingest::{IngestHandle, IngestReport, Ingestor, Payload, Source};
use crate::link::{self, LinkImport};
use crate::monitor::SensorMonitor;
use crate::publisher::SelfDevicePublisher;
use crate::registry::{MergeMode, Registry, RegistryEvent, UpsertOutcome};
use crate::relay::Relay;
use crate::sensor::{BatterySensor, LocationSensor};
use crate::store::KeyValueStore;
use crate::{DeviceRecord, Result};

/// 设备管理器选项
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// 本机设备名称
    pub device_name: String,

    /// 注册表合并模式
    pub merge_mode: MergeMode,

    /// 写入队列容量
    pub ingest_capacity: usize,

    /// 中继发布超时
    pub relay_timeout: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            device_name: "My Device".to_string(),
            merge_mode: MergeMode::Replace,
            ingest_capacity: 256,
            relay_timeout: Duration::from_secs(10),
        }
    }
}

/// 一次中继同步的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// 拉取到的载荷数
    pub fetched: usize,
    /// 写入注册表的记录数
    pub ingested: usize,
    /// 无效载荷数
    pub rejected: usize,
    /// 被忽略的记录数（本机回显或过期记录）
    pub skipped: usize,
}

/// 设备管理器
///
/// 统一的入口，整合了注册表、写入队列、本机发布器和传感器监控
pub struct DeviceManager {
    /// 设备注册表
    registry: Arc<Registry>,

    /// 写入队列
    ingest: IngestHandle,

    /// 写入任务
    ingest_task: Mutex<Option<JoinHandle<()>>>,

    /// 本机发布器
    publisher: Arc<SelfDevicePublisher>,

    /// 传感器监控器
    monitor: Mutex<Option<Arc<SensorMonitor>>>,
}

impl DeviceManager {
    /// 打开设备管理器
    ///
    /// 加载注册表、启动写入任务并初始化本机设备
    pub async fn open(
        store: Arc<dyn KeyValueStore>,
        relay: Arc<dyn Relay>,
        options: ManagerOptions,
    ) -> Result<Self> {
        let registry = Arc::new(Registry::open(store.clone(), options.merge_mode).await?);
        let (ingest, ingest_task) = Ingestor::spawn(registry.clone(), options.ingest_capacity);
        let publisher = SelfDevicePublisher::init(
            store.as_ref(),
            options.device_name,
            ingest.clone(),
            relay,
        )
        .await?
        .with_relay_timeout(options.relay_timeout);

        if let Some(saved) = registry.find_by_id(&publisher.id().await).await {
            publisher.restore(&saved).await;
        }

        info!(
            device_id = %publisher.id().await,
            devices = registry.len().await,
            "Device manager created"
        );

        Ok(Self {
            registry,
            ingest,
            ingest_task: Mutex::new(Some(ingest_task)),
            publisher: Arc::new(publisher),
            monitor: Mutex::new(None),
        })
    }

    // ========== 输入通道 ==========

    /// 手动添加设备
    pub async fn add_manual(&self, device_id: &str, name: Option<&str>) -> Result<IngestReport> {
        self.ingest
            .ingest(link::manual_payload(device_id, name), Source::Manual)
            .await
    }

    /// 导入扫码内容
    pub async fn ingest_scan(&self, payload: &str) -> Result<IngestReport> {
        self.ingest
            .ingest(Payload::Raw(payload.to_string()), Source::Scan)
            .await
    }

    /// 导入分享链接
    pub async fn import_link(&self, url: &Url) -> LinkImport {
        link::import_link(&self.ingest, url).await
    }

    /// 合并从中继拉取的载荷
    ///
    /// 无效载荷被丢弃；本机 id 的记录视为回显，不覆盖本机状态。
    pub async fn sync(&self, payloads: Vec<String>) -> Result<SyncSummary> {
        let self_id = self.publisher.id().await;
        let mut summary = SyncSummary {
            fetched: payloads.len(),
            ..SyncSummary::default()
        };

        for payload in payloads {
            let record = match codec::normalize(&payload) {
                Ok(record) => record,
                Err(e) => {
                    debug!(error = %e, "Relay payload dropped");
                    summary.rejected += 1;
                    continue;
                }
            };
            if record.id() == self_id {
                summary.skipped += 1;
                continue;
            }

            let report = self
                .ingest
                .ingest(Payload::Record(record), Source::Relay)
                .await?;
            if report.outcome == UpsertOutcome::Stale {
                summary.skipped += 1;
            } else {
                summary.ingested += 1;
            }
        }

        info!(
            fetched = summary.fetched,
            ingested = summary.ingested,
            rejected = summary.rejected,
            skipped = summary.skipped,
            "Relay sync complete"
        );
        Ok(summary)
    }

    // ========== 设备管理 ==========

    /// 删除设备，返回记录是否存在
    pub async fn remove(&self, device_id: &str) -> Result<bool> {
        self.ingest.remove(device_id).await
    }

    /// 列出设备
    pub async fn list(&self) -> Vec<DeviceRecord> {
        self.registry.list().await
    }

    /// 获取设备信息
    pub async fn find(&self, device_id: &str) -> Option<DeviceRecord> {
        self.registry.find_by_id(device_id).await
    }

    /// 订阅注册表变更
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.registry.subscribe()
    }

    // ========== 本机设备 ==========

    /// 本机记录
    pub async fn self_record(&self) -> DeviceRecord {
        self.publisher.snapshot().await
    }

    /// 发布本机记录
    pub async fn publish_self(&self) -> Result<DeviceRecord> {
        self.publisher.publish().await
    }

    /// 修改本机名称
    pub async fn rename_self(&self, name: &str) -> Result<DeviceRecord> {
        self.publisher.rename(name).await
    }

    /// 本机记录的分享链接
    pub async fn share_link(&self, base: &Url) -> Result<Url> {
        link::share_link(base, &self.self_record().await)
    }

    /// 本机记录的二维码内容
    pub async fn scan_payload(&self) -> Result<String> {
        link::scan_payload(&self.self_record().await)
    }

    // ========== 传感器 ==========

    /// 启动传感器监控
    pub async fn start_sensors(
        &self,
        location: Arc<dyn LocationSensor>,
        battery: Arc<dyn BatterySensor>,
        poll_interval: Duration,
        read_timeout: Duration,
    ) {
        let mut slot = self.monitor.lock().await;
        if slot.is_some() {
            warn!("Sensors are already running");
            return;
        }

        let monitor = Arc::new(SensorMonitor::new(
            self.publisher.clone(),
            location,
            battery,
            poll_interval,
            read_timeout,
        ));
        monitor.start().await;
        *slot = Some(monitor);
    }

    /// 停止传感器监控
    pub async fn stop_sensors(&self) {
        let monitor = self.monitor.lock().await.take();
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }
    }

    /// 关闭管理器
    ///
    /// 停止传感器，等待中继发布完成，处理完写入队列并刷新存储
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_sensors().await;
        self.publisher.close().await;

        let task = self.ingest_task.lock().await.take();
        let Some(task) = task else {
            return Ok(());
        };

        let result = self.ingest.shutdown().await;
        if let Err(e) = task.await {
            warn!(error = %e, "Ingest task ended abnormally");
        }
        info!("Device manager stopped");
        result
    }

    // ========== 访问器 ==========

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn ingest(&self) -> &IngestHandle {
        &self.ingest
    }

    pub fn publisher(&self) -> &Arc<SelfDevicePublisher> {
        &self.publisher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{FixedLocation, NoBattery};
    use crate::store::{FileStore, MemoryStore};
    use crate::{Battery, DeviceError, Location, NoopRelay};
    use tempfile::tempdir;

    async fn open_manager(store: Arc<MemoryStore>) -> DeviceManager {
        let options = ManagerOptions {
            device_name: "Me".to_string(),
            ..ManagerOptions::default()
        };
        DeviceManager::open(store, Arc::new(NoopRelay), options)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_manual_and_scan_channels() {
        let manager = open_manager(Arc::new(MemoryStore::new())).await;

        let report = manager.add_manual("k1", None).await.unwrap();
        assert_eq!(report.record.name, "Device k1");
        assert_eq!(report.source, Source::Manual);

        let report = manager
            .ingest_scan(r#"{"id":"k2","name":"Keys","battery":"55%"}"#)
            .await
            .unwrap();
        assert_eq!(report.record.battery, Battery::Level(55));

        assert!(manager.ingest_scan("{").await.unwrap_err().is_decode());

        let ids: Vec<String> = manager
            .list()
            .await
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(ids, vec!["k1", "k2"]);
    }

    #[tokio::test]
    async fn test_sync_counts_and_skips_echo() {
        let manager = open_manager(Arc::new(MemoryStore::new())).await;
        let me = manager.self_record().await;
        let echo = codec::encode(&me).unwrap();

        let summary = manager
            .sync(vec![
                r#"{"id":"r1","battery":90}"#.to_string(),
                "hello bot".to_string(),
                echo,
            ])
            .await
            .unwrap();

        assert_eq!(
            summary,
            SyncSummary {
                fetched: 3,
                ingested: 1,
                rejected: 1,
                skipped: 1,
            }
        );
        assert_eq!(manager.find("r1").await.unwrap().battery, Battery::Level(90));
        assert!(manager.find(me.id()).await.is_none());
    }

    #[tokio::test]
    async fn test_share_link_carries_self_record() {
        let manager = open_manager(Arc::new(MemoryStore::new())).await;
        let me = manager.rename_self("Laptop").await.unwrap();

        let link = manager
            .share_link(&Url::parse("https://example.com/").unwrap())
            .await
            .unwrap();
        let (payload, _) = link::take_shared_payload(&link).unwrap();
        let shared = codec::normalize(&payload).unwrap();

        assert_eq!(shared.id(), me.id());
        assert_eq!(shared.name, "Laptop");
        assert_eq!(
            codec::normalize(&manager.scan_payload().await.unwrap()).unwrap(),
            shared
        );
    }

    #[tokio::test]
    async fn test_sensors_and_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let manager = open_manager(store.clone()).await;
        let mut events = manager.subscribe();

        manager
            .start_sensors(
                Arc::new(FixedLocation::new(Location::new(3.0, 4.0).unwrap())),
                Arc::new(NoBattery),
                Duration::from_secs(60),
                Duration::from_millis(100),
            )
            .await;
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();

        manager.shutdown().await.unwrap();
        assert!(matches!(
            manager.remove("x").await,
            Err(DeviceError::IngestClosed)
        ));

        // 重启后本机记录从注册表恢复
        let reopened = open_manager(store).await;
        let me = reopened.self_record().await;
        assert_eq!(me.location, Location::new(3.0, 4.0));
        assert_eq!(reopened.find(me.id()).await.unwrap().location, me.location);
        assert!(reopened.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_open_with_non_utf8_storage() {
        let dir = tempdir().unwrap();
        for file in ["connected_devices.json", "device_id.json"] {
            std::fs::write(dir.path().join(file), [0xff, 0xfe, b'[', b']']).unwrap();
        }

        let store = Arc::new(FileStore::new(dir.path()));
        let manager = DeviceManager::open(store, Arc::new(NoopRelay), ManagerOptions::default())
            .await
            .unwrap();

        assert!(manager.list().await.is_empty());
        assert!(!manager.self_record().await.id().is_empty());
        manager.shutdown().await.unwrap();
    }
}
