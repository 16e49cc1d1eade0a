use async_trait::async_trait;

use crate::Result;

/// 中继拉取源
///
/// 返回其他实例发布到中继的原始载荷，由调用方经编解码后写入注册表。
#[async_trait]
pub trait RelaySource: Send + Sync {
    /// 拉取尚未处理的载荷
    async fn fetch(&self) -> Result<Vec<String>>;

    /// 拉取源名称
    fn name(&self) -> &str;
}
