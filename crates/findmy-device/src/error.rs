use thiserror::Error;

use crate::codec::DecodeError;

/// 设备注册表错误类型
#[derive(Error, Debug)]
pub enum DeviceError {
    /// 载荷无法解析或缺少 id
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// 传感器不支持或被拒绝
    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    /// 中继网络故障
    #[error("Relay unreachable: {0}")]
    RelayUnreachable(String),

    /// 存储读写错误
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// 写入队列已关闭
    #[error("Ingest queue closed")]
    IngestClosed,

    /// 验证错误
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// 设备注册表结果类型
pub type Result<T> = std::result::Result<T, DeviceError>;

impl DeviceError {
    /// 创建验证错误
    pub fn validation(msg: impl Into<String>) -> Self {
        DeviceError::ValidationError(msg.into())
    }

    /// 创建传感器不可用错误
    pub fn sensor_unavailable(msg: impl Into<String>) -> Self {
        DeviceError::SensorUnavailable(msg.into())
    }

    /// 创建中继不可达错误
    pub fn relay_unreachable(msg: impl Into<String>) -> Self {
        DeviceError::RelayUnreachable(msg.into())
    }

    /// 是否为载荷解析错误
    pub fn is_decode(&self) -> bool {
        matches!(self, DeviceError::Decode(_))
    }
}
