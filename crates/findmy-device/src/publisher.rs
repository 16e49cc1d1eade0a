use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::ingest::{IngestHandle, Payload, Source};
use crate::relay::Relay;
use crate::sensor::SensorReading;
use crate::store::{KeyValueStore, DEVICE_ID_ENTRY};
use crate::{DeviceRecord, Result};

/// 生成新的设备 ID
///
/// 36 进制毫秒时间戳 + 36 进制 64 位随机数，独立进程之间几乎不可能冲突。
pub fn generate_device_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let random: u64 = rand::random();
    format!("{}{}", to_base36(millis), to_base36(random))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// 读取存储中的设备 ID
///
/// 条目是 JSON 字符串；兼容早期写入的裸字符串。
fn parse_stored_id(raw: &str) -> Option<String> {
    let id = match serde_json::from_str::<String>(raw) {
        Ok(id) => id,
        Err(_) => raw.trim().to_string(),
    };
    let id = id.trim();
    let valid = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| id.to_string())
}

/// 中继发布队列
///
/// 单个任务按顺序发布，关闭时等待队列排空。
struct RelayQueue {
    tx: mpsc::UnboundedSender<DeviceRecord>,
    task: JoinHandle<()>,
}

impl RelayQueue {
    fn spawn(relay: Arc<dyn Relay>, limit: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<DeviceRecord>();
        let task = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                match timeout(limit, relay.publish(&record)).await {
                    Ok(Ok(())) => {
                        debug!(relay = relay.name(), device_id = %record.id(), "Self record relayed");
                    }
                    Ok(Err(e)) => {
                        warn!(relay = relay.name(), error = %e, "Relay publish failed");
                    }
                    Err(_) => {
                        warn!(relay = relay.name(), timeout = ?limit, "Relay publish timed out");
                    }
                }
            }
        });
        Self { tx, task }
    }
}

/// 本机设备发布器
///
/// 维护代表本机的唯一记录。每次传感器读数只修改对应字段，
/// 然后把记录写入注册表并转发给中继。
pub struct SelfDevicePublisher {
    /// 本机记录
    record: Mutex<DeviceRecord>,

    /// 注册表写入队列
    ingest: IngestHandle,

    /// 中继
    relay: Arc<dyn Relay>,

    /// 中继发布超时
    relay_timeout: Duration,

    /// 中继发布队列，首次发布时启动
    relay_queue: Mutex<Option<RelayQueue>>,

    /// 是否已关闭
    closed: AtomicBool,
}

impl SelfDevicePublisher {
    /// 初始化发布器
    ///
    /// 首次运行时生成设备 ID 并持久化，之后复用存储中的 ID。
    pub async fn init(
        store: &dyn KeyValueStore,
        name: impl Into<String>,
        ingest: IngestHandle,
        relay: Arc<dyn Relay>,
    ) -> Result<Self> {
        let stored = store.get(DEVICE_ID_ENTRY).await?;
        let id = match stored.as_deref().and_then(parse_stored_id) {
            Some(id) => id,
            None => {
                if stored.is_some() {
                    warn!("Stored device id is invalid, assigning a new one");
                }
                let id = generate_device_id();
                store
                    .set(DEVICE_ID_ENTRY, &serde_json::to_string(&id)?)
                    .await?;
                info!(device_id = %id, "Assigned new device id");
                id
            }
        };

        Ok(Self {
            record: Mutex::new(DeviceRecord::new(id, name)),
            ingest,
            relay,
            relay_timeout: Duration::from_secs(10),
            relay_queue: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn with_relay_timeout(mut self, relay_timeout: Duration) -> Self {
        self.relay_timeout = relay_timeout;
        self
    }

    /// 本机记录快照
    pub async fn snapshot(&self) -> DeviceRecord {
        self.record.lock().await.clone()
    }

    pub async fn id(&self) -> String {
        self.record.lock().await.id().to_string()
    }

    /// 用已保存的本机记录恢复电量、位置和更新时间
    ///
    /// 名称以当前配置为准；id 不一致时忽略。
    pub async fn restore(&self, saved: &DeviceRecord) {
        let mut record = self.record.lock().await;
        if saved.id() != record.id() {
            return;
        }
        record.battery = saved.battery;
        record.location = saved.location;
        record.last_updated = saved.last_updated;
    }

    /// 应用一次传感器读数并发布
    pub async fn apply(&self, reading: SensorReading) -> Result<DeviceRecord> {
        let mut record = self.record.lock().await;
        match reading {
            SensorReading::Location(location) => record.location = location,
            SensorReading::Battery(battery) => record.battery = battery,
        }
        record.touch();
        debug!(device_id = %record.id(), reading = ?reading, "Self record patched");
        self.emit(&record).await?;
        Ok(record.clone())
    }

    /// 修改名称并发布
    pub async fn rename(&self, name: impl Into<String>) -> Result<DeviceRecord> {
        let mut record = self.record.lock().await;
        record.name = name.into();
        record.touch();
        self.emit(&record).await?;
        Ok(record.clone())
    }

    /// 不做修改直接发布当前记录
    pub async fn publish(&self) -> Result<DeviceRecord> {
        let mut record = self.record.lock().await;
        record.touch();
        self.emit(&record).await?;
        Ok(record.clone())
    }

    // 持有记录锁调用，保证注册表收到的顺序与修改顺序一致
    async fn emit(&self, record: &DeviceRecord) -> Result<()> {
        self.ingest
            .ingest(Payload::Record(record.clone()), Source::Sensor)
            .await?;

        if !self.relay.is_enabled() {
            return Ok(());
        }

        let mut queue = self.relay_queue.lock().await;
        if queue.is_none() {
            if self.closed.load(Ordering::SeqCst) {
                debug!(device_id = %record.id(), "Publisher closed, relay skipped");
                return Ok(());
            }
            *queue = Some(RelayQueue::spawn(self.relay.clone(), self.relay_timeout));
        }
        if let Some(queue) = queue.as_ref() {
            if queue.tx.send(record.clone()).is_err() {
                warn!(relay = self.relay.name(), "Relay queue stopped");
            }
        }

        Ok(())
    }

    /// 关闭中继队列，等待已排队的发布完成
    ///
    /// 之后的修改仍写入注册表，但不再转发给中继。
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let queue = self.relay_queue.lock().await.take();
        if let Some(RelayQueue { tx, task }) = queue {
            drop(tx);
            if let Err(e) = task.await {
                warn!(error = %e, "Relay queue ended abnormally");
            }
        }
    }
}
