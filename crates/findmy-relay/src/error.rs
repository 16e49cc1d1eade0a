use findmy_device::DeviceError;
use thiserror::Error;

/// 中继错误类型
#[derive(Error, Debug)]
pub enum RelayError {
    /// 网络错误或超时
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// 非成功状态码
    #[error("{relay} responded with status {status}")]
    Status { relay: String, status: u16 },

    /// 接口返回 ok=false
    #[error("API error: {0}")]
    Api(String),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 配置错误
    #[error("Invalid relay config: {0}")]
    InvalidConfig(String),
}

/// 中继结果类型
pub type Result<T> = std::result::Result<T, RelayError>;

impl From<RelayError> for DeviceError {
    fn from(err: RelayError) -> Self {
        DeviceError::relay_unreachable(err.to_string())
    }
}
