use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// 关闭信号类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM - 优雅关闭
    Term,

    /// SIGINT - Ctrl+C
    Interrupt,

    /// 手动触发
    Manual,
}

/// 信号处理器
pub struct SignalHandler {
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl SignalHandler {
    pub fn new() -> (Self, broadcast::Receiver<ShutdownSignal>) {
        let (tx, rx) = broadcast::channel(16);
        (Self { shutdown_tx: tx }, rx)
    }

    /// 等待系统信号
    ///
    /// 无法注册信号处理时退化为只等待手动触发。
    #[cfg(unix)]
    pub async fn wait_for_system_signal(&self) -> ShutdownSignal {
        use signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Failed to install signal handlers");
                    return self.wait_for_manual().await;
                }
            };
        let mut manual = self.shutdown_tx.subscribe();

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                let _ = self.shutdown_tx.send(ShutdownSignal::Term);
                ShutdownSignal::Term
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
                let _ = self.shutdown_tx.send(ShutdownSignal::Interrupt);
                ShutdownSignal::Interrupt
            }
            signal = manual.recv() => signal.unwrap_or(ShutdownSignal::Manual),
        }
    }

    /// 等待系统信号（Windows 版本）
    #[cfg(not(unix))]
    pub async fn wait_for_system_signal(&self) -> ShutdownSignal {
        let mut manual = self.shutdown_tx.subscribe();
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl+C");
                    return self.wait_for_manual().await;
                }
                info!("Received Ctrl+C");
                let _ = self.shutdown_tx.send(ShutdownSignal::Interrupt);
                ShutdownSignal::Interrupt
            }
            signal = manual.recv() => signal.unwrap_or(ShutdownSignal::Manual),
        }
    }

    async fn wait_for_manual(&self) -> ShutdownSignal {
        let mut rx = self.shutdown_tx.subscribe();
        rx.recv().await.unwrap_or(ShutdownSignal::Manual)
    }

    /// 手动触发关闭
    pub fn trigger_shutdown(&self) {
        info!("Manual shutdown triggered");
        let _ = self.shutdown_tx.send(ShutdownSignal::Manual);
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new().0
    }
}
