use async_trait::async_trait;
use findmy_device::{DeviceError, DeviceRecord, Relay};
use tracing::{error, info, warn};

use crate::source::RelaySource;

/// 中继管理器
///
/// 发布时把记录转发给所有已启用的中继，拉取时合并所有拉取源的载荷。
/// 单个中继失败不影响其他中继。
#[derive(Default)]
pub struct RelayManager {
    /// 发布中继
    relays: Vec<Box<dyn Relay>>,

    /// 拉取源
    sources: Vec<Box<dyn RelaySource>>,
}

impl RelayManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册发布中继
    pub fn register(&mut self, relay: Box<dyn Relay>) {
        info!("Registered relay: {}", relay.name());
        self.relays.push(relay);
    }

    /// 注册拉取源
    pub fn register_source(&mut self, source: Box<dyn RelaySource>) {
        info!("Registered relay source: {}", source.name());
        self.sources.push(source);
    }

    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    pub fn has_sources(&self) -> bool {
        !self.sources.is_empty()
    }

    /// 从所有拉取源获取载荷
    ///
    /// 失败的拉取源只记录日志。
    pub async fn fetch_all(&self) -> Vec<String> {
        let mut payloads = Vec::new();
        for source in &self.sources {
            match source.fetch().await {
                Ok(fetched) => {
                    info!("Fetched {} payloads via {}", fetched.len(), source.name());
                    payloads.extend(fetched);
                }
                Err(e) => {
                    warn!("Relay fetch error via {}: {}", source.name(), e);
                }
            }
        }
        payloads
    }
}

#[async_trait]
impl Relay for RelayManager {
    async fn publish(&self, record: &DeviceRecord) -> findmy_device::Result<()> {
        let mut failed = Vec::new();

        for relay in self.relays.iter().filter(|r| r.is_enabled()) {
            if let Err(e) = relay.publish(record).await {
                error!("Relay error via {}: {}", relay.name(), e);
                failed.push(relay.name().to_string());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(DeviceError::relay_unreachable(format!(
                "failed relays: {}",
                failed.join(", ")
            )))
        }
    }

    fn name(&self) -> &str {
        "manager"
    }

    fn is_enabled(&self) -> bool {
        self.relays.iter().any(|r| r.is_enabled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RelayError, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingRelay {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Relay for CountingRelay {
        async fn publish(&self, _record: &DeviceRecord) -> findmy_device::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(DeviceError::relay_unreachable("down"))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    struct StaticSource(Option<Vec<&'static str>>);

    #[async_trait]
    impl RelaySource for StaticSource {
        async fn fetch(&self) -> Result<Vec<String>> {
            match &self.0 {
                Some(payloads) => Ok(payloads.iter().map(|p| p.to_string()).collect()),
                None => Err(RelayError::Api("unavailable".to_string())),
            }
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    #[tokio::test]
    async fn test_publish_fans_out() {
        let ok_calls = Arc::new(AtomicUsize::new(0));
        let down_calls = Arc::new(AtomicUsize::new(0));
        let mut manager = RelayManager::new();
        assert!(!manager.is_enabled());

        manager.register(Box::new(CountingRelay {
            name: "down",
            calls: down_calls.clone(),
            fail: true,
        }));
        manager.register(Box::new(CountingRelay {
            name: "ok",
            calls: ok_calls.clone(),
            fail: false,
        }));
        manager.register(Box::new(findmy_device::NoopRelay));
        assert!(manager.is_enabled());
        assert_eq!(manager.relay_count(), 3);

        let err = manager
            .publish(&DeviceRecord::with_default_name("a"))
            .await
            .unwrap_err();

        // 失败的中继不阻止后续中继
        assert_eq!(down_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ok_calls.load(Ordering::SeqCst), 1);
        assert!(err.to_string().contains("down"));
    }

    #[tokio::test]
    async fn test_fetch_all_skips_failed_sources() {
        let mut manager = RelayManager::new();
        assert!(!manager.has_sources());
        manager.register_source(Box::new(StaticSource(None)));
        manager.register_source(Box::new(StaticSource(Some(vec!["a", "b"]))));

        assert_eq!(manager.fetch_all().await, vec!["a", "b"]);
    }
}
