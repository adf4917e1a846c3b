//! Graceful shutdown handling

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info};

#[derive(Default)]
struct ShutdownState {
    notify: Notify,
    triggered: AtomicBool,
}

impl ShutdownState {
    fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

/// Shutdown coordinator
#[derive(Default)]
pub struct ShutdownCoordinator {
    state: Arc<ShutdownState>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a shutdown notifier
    pub fn subscribe(&self) -> ShutdownNotifier {
        ShutdownNotifier {
            state: self.state.clone(),
        }
    }

    /// Wait for Ctrl+C or SIGTERM, then notify all subscribers
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C signal");
            }
            _ = terminate => {
                info!("Received SIGTERM signal");
            }
        }

        self.state.trigger();
    }

    /// Trigger shutdown manually
    pub fn shutdown(&self) {
        info!("Manual shutdown triggered");
        self.state.trigger();
    }
}

/// Shutdown notifier for components
#[derive(Clone)]
pub struct ShutdownNotifier {
    state: Arc<ShutdownState>,
}

impl ShutdownNotifier {
    /// Resolve once shutdown has been triggered, immediately if it already was
    pub async fn wait(&self) {
        let notified = self.state.notify.notified();
        if self.is_shutdown() {
            return;
        }
        notified.await;
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.triggered.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_wakes_subscribers() {
        let coordinator = ShutdownCoordinator::new();
        let notifier1 = coordinator.subscribe();
        let notifier2 = coordinator.subscribe();

        let handle1 = tokio::spawn(async move {
            notifier1.wait().await;
            1
        });
        let handle2 = tokio::spawn(async move {
            notifier2.wait().await;
            2
        });

        // Let both tasks park on the notifier
        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.shutdown();

        let result1 = tokio::time::timeout(Duration::from_secs(1), handle1).await.unwrap().unwrap();
        let result2 = tokio::time::timeout(Duration::from_secs(1), handle2).await.unwrap().unwrap();
        assert_eq!((result1, result2), (1, 2));
    }

    #[tokio::test]
    async fn test_late_subscriber_returns_immediately() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.shutdown();

        let notifier = coordinator.subscribe();
        assert!(notifier.is_shutdown());
        tokio::time::timeout(Duration::from_millis(100), notifier.wait())
            .await
            .unwrap();
    }
}
