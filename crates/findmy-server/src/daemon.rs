use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::app::App;
use crate::signal::SignalHandler;

/// 守护进程：传感器轮询 + 定期中继同步，收到信号后有序关闭
pub async fn run(app: Arc<App>, signals: &SignalHandler) -> Result<()> {
    run_until(app, async {
        let signal = signals.wait_for_system_signal().await;
        info!(signal = ?signal, "Shutdown requested");
    })
    .await
}

/// 运行直到 `shutdown` 完成
pub async fn run_until(app: Arc<App>, shutdown: impl Future<Output = ()>) -> Result<()> {
    let me = app.manager.publish_self().await?;
    info!(device_id = %me.id(), name = %me.name, "Daemon started");

    app.start_sensors().await;

    let (stop_tx, stop_rx) = watch::channel(false);
    let sync_task = match app.config.relay.sync_interval() {
        Some(every) if app.relays.has_sources() => {
            Some(tokio::spawn(sync_loop(app.clone(), every, stop_rx)))
        }
        _ => {
            info!("Periodic relay sync disabled");
            None
        }
    };

    shutdown.await;

    // 先停止所有生产者，再排空写入队列
    let _ = stop_tx.send(true);
    if let Some(task) = sync_task {
        if let Err(e) = task.await {
            warn!(error = %e, "Sync task ended abnormally");
        }
    }
    app.shutdown().await?;

    info!("Daemon stopped");
    Ok(())
}

async fn sync_loop(app: Arc<App>, every: Duration, mut stop_rx: watch::Receiver<bool>) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = app.sync_once().await {
                    warn!(error = %e, "Relay sync failed");
                }
            }
            result = stop_rx.changed() => {
                if result.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use findmy_config::{AppConfig, BatterySource};
    use findmy_device::{FileStore, MergeMode, Registry};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_run_until_flushes_self_record() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.dir = dir.path().to_path_buf();
        config.sensors.battery = BatterySource::Disabled;

        let app = Arc::new(App::open(config).await.unwrap());
        let self_id = app.manager.self_record().await.id().to_string();

        run_until(app, tokio::time::sleep(Duration::from_millis(100)))
            .await
            .unwrap();

        let registry = Registry::open(Arc::new(FileStore::new(dir.path())), MergeMode::Replace)
            .await
            .unwrap();
        let stored = registry.find_by_id(&self_id).await.unwrap();
        assert_eq!(stored.name, "My Device");
        assert!(stored.last_updated.is_some());
    }
}
