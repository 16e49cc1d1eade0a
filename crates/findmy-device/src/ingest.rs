//! 单写者写入队列
//!
//! 所有入口（传感器、手动输入、扫码、分享链接、中继拉取）通过
//! [`IngestHandle`] 提交载荷，由唯一的 [`Ingestor`] 任务依次解码并写入注册表。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec;
use crate::registry::{Registry, UpsertOutcome};
use crate::{DeviceError, DeviceRecord, Result};

/// 载荷来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// 本机传感器
    Sensor,
    /// 手动输入
    Manual,
    /// 二维码/条码扫描
    Scan,
    /// 分享链接
    Link,
    /// 中继拉取
    Relay,
}

/// 待写入的载荷
#[derive(Debug, Clone)]
pub enum Payload {
    /// 未解析的 JSON 文本
    Raw(String),
    /// 已解析但未校验的 JSON
    Value(Value),
    /// 已规范化的记录
    Record(DeviceRecord),
}

/// 单次写入的结果
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub record: DeviceRecord,
    pub outcome: UpsertOutcome,
    pub source: Source,
}

enum IngestCommand {
    Ingest {
        payload: Payload,
        source: Source,
        reply: Option<oneshot::Sender<Result<IngestReport>>>,
    },
    Remove {
        device_id: String,
        reply: oneshot::Sender<Result<bool>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// 写入队列句柄
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<IngestCommand>,
}

impl IngestHandle {
    /// 提交载荷并等待写入结果
    ///
    /// # 错误
    /// * `Decode` - 载荷无效，注册表未改变
    /// * `IngestClosed` - 队列已关闭
    pub async fn ingest(&self, payload: Payload, source: Source) -> Result<IngestReport> {
        let (reply, rx) = oneshot::channel();
        self.send(IngestCommand::Ingest {
            payload,
            source,
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| DeviceError::IngestClosed)?
    }

    /// 提交载荷，不等待结果（错误由队列记录日志）
    pub async fn submit(&self, payload: Payload, source: Source) -> Result<()> {
        self.send(IngestCommand::Ingest {
            payload,
            source,
            reply: None,
        })
        .await
    }

    /// 删除设备，返回记录是否存在
    pub async fn remove(&self, device_id: impl Into<String>) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(IngestCommand::Remove {
            device_id: device_id.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| DeviceError::IngestClosed)?
    }

    /// 关闭队列：处理完已排队的命令并刷新存储后返回
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(IngestCommand::Shutdown { reply }).await?;
        rx.await.map_err(|_| DeviceError::IngestClosed)?
    }

    async fn send(&self, command: IngestCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| DeviceError::IngestClosed)
    }
}

/// 写入任务
pub struct Ingestor {
    registry: Arc<Registry>,
    rx: mpsc::Receiver<IngestCommand>,
}

impl Ingestor {
    /// 启动写入任务
    pub fn spawn(registry: Arc<Registry>, capacity: usize) -> (IngestHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let ingestor = Self { registry, rx };
        let task = tokio::spawn(ingestor.run());
        (IngestHandle { tx }, task)
    }

    async fn run(mut self) {
        info!("Ingestor started");

        let mut shutdown_replies = Vec::new();
        while let Some(command) = self.rx.recv().await {
            match command {
                IngestCommand::Shutdown { reply } => {
                    // 关闭后 recv 仍会返回已排队的命令
                    self.rx.close();
                    shutdown_replies.push(reply);
                }
                command => self.handle(command).await,
            }
        }

        let flushed = self.registry.flush().await;
        if let Err(e) = &flushed {
            warn!(error = %e, "Final registry flush failed");
        }
        for reply in shutdown_replies {
            let result = match &flushed {
                Ok(()) => Ok(()),
                Err(e) => Err(DeviceError::Storage(std::io::Error::other(e.to_string()))),
            };
            let _ = reply.send(result);
        }
        info!("Ingestor stopped");
    }

    async fn handle(&self, command: IngestCommand) {
        match command {
            IngestCommand::Ingest {
                payload,
                source,
                reply,
            } => {
                let result = self.apply(payload, source).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(source = ?source, error = %e, "Queued payload rejected");
                        }
                    }
                }
            }
            IngestCommand::Remove { device_id, reply } => {
                let _ = reply.send(self.registry.remove(&device_id).await);
            }
            IngestCommand::Shutdown { .. } => {}
        }
    }

    async fn apply(&self, payload: Payload, source: Source) -> Result<IngestReport> {
        let decoded = match payload {
            Payload::Raw(text) => codec::normalize(&text),
            Payload::Value(value) => codec::normalize_value(&value),
            Payload::Record(record) => Ok(record),
        };
        let mut record = match decoded {
            Ok(record) => record,
            Err(e) => {
                warn!(source = ?source, error = %e, "Discarded malformed payload");
                return Err(e.into());
            }
        };

        if record.last_updated.is_none() {
            record.touch();
        }

        let outcome = self.registry.upsert(record.clone()).await?;
        debug!(
            device_id = %record.id(),
            source = ?source,
            outcome = ?outcome,
            "Payload ingested"
        );

        Ok(IngestReport {
            record,
            outcome,
            source,
        })
    }
}
