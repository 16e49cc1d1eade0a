use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::publisher::SelfDevicePublisher;
use crate::sensor::{read_battery, read_location, BatterySensor, LocationSensor, SensorReading};
use crate::{Battery, Location};

/// 上一次转发的读数
#[derive(Debug, Default)]
pub struct SampleState {
    location: Option<Option<Location>>,
    battery: Option<Battery>,
}

/// 传感器监控器
///
/// 定期读取位置与电量传感器，读数变化时交给本机发布器。
/// 两个传感器并发读取，任一失败不影响另一个。
pub struct SensorMonitor {
    /// 本机发布器
    publisher: Arc<SelfDevicePublisher>,

    /// 位置传感器
    location: Arc<dyn LocationSensor>,

    /// 电量传感器
    battery: Arc<dyn BatterySensor>,

    /// 轮询间隔
    poll_interval: Duration,

    /// 单次读取超时
    read_timeout: Duration,

    /// 停止信号
    stop_tx: watch::Sender<bool>,

    /// 后台任务
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SensorMonitor {
    /// 创建传感器监控器
    pub fn new(
        publisher: Arc<SelfDevicePublisher>,
        location: Arc<dyn LocationSensor>,
        battery: Arc<dyn BatterySensor>,
        poll_interval: Duration,
        read_timeout: Duration,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            publisher,
            location,
            battery,
            poll_interval,
            read_timeout,
            stop_tx,
            task: Mutex::new(None),
        }
    }

    /// 读取一次传感器，返回与上次不同的读数（首次读取总是返回）
    pub async fn sample(&self, state: &mut SampleState) -> Vec<SensorReading> {
        let (location, battery) = tokio::join!(
            read_location(self.location.as_ref(), self.read_timeout),
            read_battery(self.battery.as_ref(), self.read_timeout),
        );

        let mut readings = Vec::new();
        if state.location != Some(location) {
            state.location = Some(location);
            readings.push(SensorReading::Location(location));
        }
        if state.battery != Some(battery) {
            state.battery = Some(battery);
            readings.push(SensorReading::Battery(battery));
        }
        readings
    }

    /// 启动监控器
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!("Sensor monitor is already running");
            return;
        }

        info!(
            poll_interval = ?self.poll_interval,
            read_timeout = ?self.read_timeout,
            location = self.location.name(),
            battery = self.battery.name(),
            "Sensor monitor started"
        );

        let _ = self.stop_tx.send(false);
        let mut stop_rx = self.stop_tx.subscribe();
        let monitor = self.clone();

        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(monitor.poll_interval);
            let mut state = SampleState::default();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                for reading in monitor.sample(&mut state).await {
                    if let Err(e) = monitor.publisher.apply(reading).await {
                        warn!(error = %e, "Failed to publish sensor reading");
                    }
                }
                debug!("Sensor poll complete");
            }

            info!("Sensor monitor stopped");
        }));
    }

    /// 停止监控器并等待后台任务结束
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            info!("Sensor monitor stopping...");
            if let Err(e) = task.await {
                warn!(error = %e, "Sensor monitor task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Ingestor;
    use crate::registry::{MergeMode, Registry};
    use crate::sensor::{FixedLocation, NoBattery};
    use crate::store::MemoryStore;
    use crate::{NoopRelay, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU8, Ordering};

    struct SettableBattery(AtomicU8);

    #[async_trait]
    impl BatterySensor for SettableBattery {
        async fn level(&self) -> Result<u8> {
            Ok(self.0.load(Ordering::SeqCst))
        }

        fn name(&self) -> &str {
            "settable"
        }
    }

    async fn setup(battery: Arc<dyn BatterySensor>) -> (Arc<SensorMonitor>, Arc<Registry>) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(Registry::open(store.clone(), MergeMode::Replace).await.unwrap());
        let (ingest, _task) = Ingestor::spawn(registry.clone(), 8);
        let publisher = SelfDevicePublisher::init(store.as_ref(), "Me", ingest, Arc::new(NoopRelay))
            .await
            .unwrap();
        let monitor = SensorMonitor::new(
            Arc::new(publisher),
            Arc::new(FixedLocation::new(Location::new(1.0, 2.0).unwrap())),
            battery,
            Duration::from_millis(20),
            Duration::from_millis(50),
        );
        (Arc::new(monitor), registry)
    }

    #[tokio::test]
    async fn test_sample_reports_only_changes() {
        let battery = Arc::new(SettableBattery(AtomicU8::new(90)));
        let (monitor, _) = setup(battery.clone()).await;
        let mut state = SampleState::default();

        let first = monitor.sample(&mut state).await;
        assert_eq!(
            first,
            vec![
                SensorReading::Location(Location::new(1.0, 2.0)),
                SensorReading::Battery(Battery::Level(90)),
            ]
        );

        assert!(monitor.sample(&mut state).await.is_empty());

        battery.0.store(89, Ordering::SeqCst);
        assert_eq!(
            monitor.sample(&mut state).await,
            vec![SensorReading::Battery(Battery::Level(89))]
        );
    }

    #[tokio::test]
    async fn test_unsupported_battery_is_reported_once() {
        let (monitor, _) = setup(Arc::new(NoBattery)).await;
        let mut state = SampleState::default();

        let first = monitor.sample(&mut state).await;
        assert!(first.contains(&SensorReading::Battery(Battery::Unavailable)));
        assert!(monitor.sample(&mut state).await.is_empty());
    }

    #[tokio::test]
    async fn test_start_publishes_and_stops() {
        let (monitor, registry) = setup(Arc::new(NoBattery)).await;

        monitor.start().await;
        let mut events = registry.subscribe();
        if registry.is_empty().await {
            tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .unwrap()
                .unwrap();
        }
        monitor.stop().await;

        let records = registry.list().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Me");
    }
}
