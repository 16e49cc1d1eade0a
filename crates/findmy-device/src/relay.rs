use async_trait::async_trait;

use crate::{DeviceRecord, Result};

/// 中继
///
/// 把本机记录转发给其他实例。失败只记录日志，等下一次传感器更新时自然重试。
#[async_trait]
pub trait Relay: Send + Sync {
    /// 发布设备记录
    ///
    /// # 错误
    /// * `RelayUnreachable` - 网络故障
    async fn publish(&self, record: &DeviceRecord) -> Result<()>;

    /// 中继名称
    fn name(&self) -> &str;

    /// 是否启用
    fn is_enabled(&self) -> bool {
        true
    }
}

/// 未配置中继时使用
pub struct NoopRelay;

#[async_trait]
impl Relay for NoopRelay {
    async fn publish(&self, _record: &DeviceRecord) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }

    fn is_enabled(&self) -> bool {
        false
    }
}
