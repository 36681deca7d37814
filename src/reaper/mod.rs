use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::manager::SessionManager;

/// Idle reaper configuration.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// How often to sweep the registry.
    pub interval: Duration,
    /// Max time since last consumer access before eviction.
    pub idle_timeout: Duration,
}

impl From<&crate::config::StreamingConfig> for ReaperConfig {
    fn from(config: &crate::config::StreamingConfig) -> Self {
        Self {
            interval: config.reap_interval(),
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Periodic sweep evicting sessions nobody is watching.
///
/// Runs independently of request traffic. Termination is delegated back
/// through the session manager so start, stop and reap share one code
/// path; the sweep never holds the registry's insertion lock while a
/// process is being terminated.
pub struct IdleReaper {
    config: ReaperConfig,
    manager: Arc<SessionManager>,
    sweep_handle: Option<tokio::task::JoinHandle<()>>,
}

impl IdleReaper {
    pub fn new(config: ReaperConfig, manager: Arc<SessionManager>) -> Self {
        Self {
            config,
            manager,
            sweep_handle: None,
        }
    }

    pub fn start(&mut self) {
        if self.sweep_handle.is_some() {
            warn!("idle reaper already running");
            return;
        }

        let config = self.config.clone();
        let manager = self.manager.clone();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                Self::sweep(&config, &manager).await;
            }
        });

        self.sweep_handle = Some(handle);
        info!(
            interval_secs = self.config.interval.as_secs(),
            idle_timeout_secs = self.config.idle_timeout.as_secs(),
            "idle reaper started"
        );
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.sweep_handle.take() {
            handle.abort();
            info!("idle reaper stopped");
        }
    }

    async fn sweep(config: &ReaperConfig, manager: &SessionManager) {
        let sessions = manager.list();
        debug!(active = sessions.len(), "reaper sweep");

        for session in sessions {
            let Some(idle_seconds) = session.idle_seconds else {
                continue;
            };

            if Duration::from_secs(idle_seconds) > config.idle_timeout {
                info!(
                    camera_id = %session.camera_id,
                    idle_seconds,
                    "evicting idle session"
                );
                // Best effort: a concurrent manual stop makes this a no-op.
                manager.stop(&session.camera_id).await;
            }
        }
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        self.stop();
    }
}
