use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::store::{KeyValueStore, DEVICES_ENTRY};
use crate::{Battery, DeviceRecord, Result};

/// 合并模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// 整条替换，后写入者胜出
    #[default]
    Replace,
    /// 字段级合并：未知字段保留旧值，较旧的记录被忽略
    FieldLevel,
}

/// upsert 结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// 新增
    Inserted,
    /// 整条替换
    Replaced,
    /// 字段级合并
    Merged,
    /// 时间戳早于现有记录，已忽略
    Stale,
}

/// 注册表变更事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Upserted { id: String, created: bool },
    Removed { id: String },
}

/// 设备注册表
///
/// 按插入顺序保存设备记录，每个 id 只对应一条记录。
/// 每次变更在返回前把完整列表写入持久化存储；写锁覆盖整个写入过程，
/// 因此存储中最后一次提交的内容总是对应最后一次逻辑变更。
pub struct Registry {
    /// 持久化存储
    store: Arc<dyn KeyValueStore>,

    /// 设备记录（有序）
    records: RwLock<Vec<DeviceRecord>>,

    /// 合并模式
    mode: MergeMode,

    /// 变更通知
    events: broadcast::Sender<RegistryEvent>,
}

impl Registry {
    /// 从存储加载注册表
    ///
    /// 存储中的每条记录都经过编解码校验；无效记录被跳过，
    /// 内容整体损坏时以空注册表启动。
    pub async fn open(store: Arc<dyn KeyValueStore>, mode: MergeMode) -> Result<Self> {
        let records = match store.get(DEVICES_ENTRY).await? {
            Some(raw) => load_records(&raw),
            None => Vec::new(),
        };

        info!(count = records.len(), mode = ?mode, "Device registry opened");

        let (events, _) = broadcast::channel(64);
        Ok(Self {
            store,
            records: RwLock::new(records),
            mode,
            events,
        })
    }

    /// 插入或更新设备记录
    pub async fn upsert(&self, record: DeviceRecord) -> Result<UpsertOutcome> {
        let id = record.id().to_string();
        let mut records = self.records.write().await;
        let mut next = records.clone();

        let outcome = match next.iter().position(|r| r.id() == record.id()) {
            None => {
                next.push(record);
                UpsertOutcome::Inserted
            }
            Some(index) => match self.mode {
                MergeMode::Replace => {
                    next[index] = record;
                    UpsertOutcome::Replaced
                }
                MergeMode::FieldLevel => match merge_fields(&next[index], record) {
                    Some(merged) => {
                        next[index] = merged;
                        UpsertOutcome::Merged
                    }
                    None => {
                        debug!(device_id = %id, "Stale record ignored");
                        return Ok(UpsertOutcome::Stale);
                    }
                },
            },
        };

        self.persist(&next).await?;
        *records = next;
        drop(records);

        let created = outcome == UpsertOutcome::Inserted;
        if created {
            info!(device_id = %id, "Device added");
        } else {
            debug!(device_id = %id, outcome = ?outcome, "Device updated");
        }
        let _ = self.events.send(RegistryEvent::Upserted { id, created });

        Ok(outcome)
    }

    /// 删除设备记录
    ///
    /// 返回记录是否存在；删除不存在的 id 不报错。
    pub async fn remove(&self, device_id: &str) -> Result<bool> {
        let mut records = self.records.write().await;
        let Some(index) = records.iter().position(|r| r.id() == device_id) else {
            debug!(device_id = %device_id, "Remove of unknown device ignored");
            return Ok(false);
        };

        let mut next = records.clone();
        next.remove(index);
        self.persist(&next).await?;
        *records = next;
        drop(records);

        info!(device_id = %device_id, "Device removed");
        let _ = self.events.send(RegistryEvent::Removed {
            id: device_id.to_string(),
        });
        Ok(true)
    }

    /// 当前记录的快照
    pub async fn list(&self) -> Vec<DeviceRecord> {
        self.records.read().await.clone()
    }

    /// 按 id 查询
    pub async fn find_by_id(&self, device_id: &str) -> Option<DeviceRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id() == device_id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// 重新写入完整列表
    pub async fn flush(&self) -> Result<()> {
        let records = self.records.read().await;
        self.persist(&records).await?;
        debug!(count = records.len(), "Device registry flushed");
        Ok(())
    }

    /// 订阅变更事件
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    async fn persist(&self, records: &[DeviceRecord]) -> Result<()> {
        let json = serde_json::to_string(records)?;
        self.store.set(DEVICES_ENTRY, &json).await
    }
}

fn load_records(raw: &str) -> Vec<DeviceRecord> {
    let items = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            error!("Stored device list is not an array, starting empty");
            return Vec::new();
        }
        Err(e) => {
            error!(error = %e, "Stored device list is corrupt, starting empty");
            return Vec::new();
        }
    };

    let mut records: Vec<DeviceRecord> = Vec::with_capacity(items.len());
    for item in &items {
        match codec::normalize_value(item) {
            Ok(record) => match records.iter().position(|r| r.id() == record.id()) {
                Some(index) => records[index] = record,
                None => records.push(record),
            },
            Err(e) => warn!(error = %e, "Skipping invalid stored device"),
        }
    }
    records
}

fn merge_fields(existing: &DeviceRecord, incoming: DeviceRecord) -> Option<DeviceRecord> {
    if let (Some(old), Some(new)) = (existing.last_updated, incoming.last_updated) {
        if new < old {
            return None;
        }
    }

    let mut merged = incoming;
    if merged.battery == Battery::Unavailable {
        merged.battery = existing.battery;
    }
    if merged.location.is_none() {
        merged.location = existing.location;
    }
    if merged.has_default_name() {
        merged.name = existing.name.clone();
    }
    if merged.last_updated.is_none() {
        merged.last_updated = existing.last_updated;
    }
    Some(merged)
}
