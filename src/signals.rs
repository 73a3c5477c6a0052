use crate::app::{LifecycleController, ShutdownReason};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Merges OS termination signals and a parent context into one shutdown token.
///
/// The first request wins; its reason is kept for reporting.
#[derive(Clone, Debug)]
pub struct SignalBridge {
    parent: CancellationToken,
    token: CancellationToken,
    reason: Arc<Mutex<Option<ShutdownReason>>>,
}

impl SignalBridge {
    /// Bridge without OS listeners; shutdown comes from `parent` or
    /// [`SignalBridge::request_shutdown`]
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            parent: parent.clone(),
            token: parent.child_token(),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Bridge that also listens for SIGINT, SIGTERM and SIGQUIT
    pub fn install(parent: &CancellationToken) -> Self {
        let bridge = Self::new(parent);
        bridge.setup_signal_handlers();
        bridge
    }

    /// Token cancelled once shutdown is requested
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        if let Some(reason) = self.reason.lock().clone() {
            return Some(reason);
        }
        if self.parent.is_cancelled() {
            return Some(ShutdownReason::ParentCancelled);
        }
        None
    }

    /// Record `reason` and cancel the shutdown token. Returns `false` if a
    /// shutdown had already been requested.
    pub fn request_shutdown(&self, reason: ShutdownReason) -> bool {
        {
            let mut current = self.reason.lock();
            if current.is_some() || self.token.is_cancelled() {
                debug!("Shutdown already requested, ignoring {}", reason);
                return false;
            }
            info!("Shutdown requested: {}", reason);
            *current = Some(reason);
        }
        self.token.cancel();
        true
    }

    /// Wait until shutdown is requested and report why
    pub async fn wait(&self) -> ShutdownReason {
        self.token.cancelled().await;
        self.reason().unwrap_or(ShutdownReason::ParentCancelled)
    }

    /// Stop `controller` once shutdown is requested, unless it is not
    /// running or its stop sequence already ran
    pub fn attach(&self, controller: &LifecycleController) -> JoinHandle<()> {
        let bridge = self.clone();
        let controller = controller.clone();

        tokio::spawn(async move {
            let reason = bridge.wait().await;

            if !controller.is_running() || controller.stop_executed() {
                debug!(
                    "Service {} needs no stop after {} (state {})",
                    controller.name(),
                    reason,
                    controller.state()
                );
                return;
            }

            info!("Stopping service {} after {}", controller.name(), reason);
            if let Err(e) = controller.stop().await {
                warn!("Stop of {} after {} failed: {}", controller.name(), reason, e);
            }
        })
    }

    fn setup_signal_handlers(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let signals = [
                (SignalKind::interrupt(), "SIGINT"),
                (SignalKind::terminate(), "SIGTERM"),
                (SignalKind::quit(), "SIGQUIT"),
            ];

            for (kind, name) in signals {
                let mut stream = match signal(kind) {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!("Failed to register {} handler: {}", name, e);
                        continue;
                    }
                };

                let bridge = self.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        received = stream.recv() => {
                            if received.is_some() {
                                info!("Received {} signal", name);
                                bridge.request_shutdown(ShutdownReason::Signal(name.to_string()));
                            }
                        }
                        _ = bridge.token.cancelled() => {}
                    }
                });
            }
        }

        #[cfg(not(unix))]
        {
            let bridge = self.clone();
            tokio::spawn(async move {
                tokio::select! {
                    received = tokio::signal::ctrl_c() => {
                        if received.is_ok() {
                            info!("Received SIGINT signal (Ctrl+C)");
                            bridge.request_shutdown(ShutdownReason::Signal("SIGINT".to_string()));
                        }
                    }
                    _ = bridge.token.cancelled() => {}
                }
            });
        }
    }
}
