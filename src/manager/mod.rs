use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::registry::Registry;
use crate::supervisor::{ExitEvent, ProcessHandle, Supervisor};
use crate::tracker::AccessTracker;

mod session_info;
pub use session_info::{SessionInfo, SessionState};

/// One camera's active transcoding pipeline and its bookkeeping.
///
/// The registry exclusively owns each session; each session exclusively
/// owns its process handle. The source URL is immutable for the session's
/// lifetime.
pub struct Session {
    camera_id: String,
    source_url: String,
    started_at: DateTime<Utc>,
    state: RwLock<SessionState>,
    process: ProcessHandle,
}

impl Session {
    fn new(camera_id: &str, source_url: &str, process: ProcessHandle) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            source_url: source_url.to_string(),
            started_at: Utc::now(),
            state: RwLock::new(SessionState::Starting),
            process,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }
}

/// Public entry point composing the registry, supervisor and access
/// tracker into one contract: `start`, `stop`, `stop_all`, `touch`,
/// `list`. The HTTP boundary and the idle reaper both go through here so
/// every termination shares one code path.
pub struct SessionManager {
    config: Arc<Config>,
    supervisor: Supervisor,
    registry: Arc<Registry<Arc<Session>>>,
    tracker: Arc<AccessTracker>,
}

impl SessionManager {
    pub fn new(config: Arc<Config>) -> Self {
        let (supervisor, exit_rx) = Supervisor::new(config.streaming.clone());
        let registry = Arc::new(Registry::new());
        let tracker = Arc::new(AccessTracker::new());

        Self::spawn_exit_listener(exit_rx, registry.clone(), tracker.clone());

        Self {
            config,
            supervisor,
            registry,
            tracker,
        }
    }

    /// Removes dead entries the moment their process exits, so a crashed
    /// transcoder is never observable as a live session. Operator-driven
    /// stops remove the entry first, making their exit events no-ops here.
    fn spawn_exit_listener(
        mut exit_rx: mpsc::UnboundedReceiver<ExitEvent>,
        registry: Arc<Registry<Arc<Session>>>,
        tracker: Arc<AccessTracker>,
    ) {
        tokio::spawn(async move {
            while let Some(event) = exit_rx.recv().await {
                match registry.remove(&event.camera_id) {
                    Some(session) => {
                        tracker.forget(&event.camera_id);
                        session.set_state(SessionState::Terminated);
                        warn!(
                            camera_id = %event.camera_id,
                            outcome = ?event.outcome,
                            "transcoder exited unexpectedly, session removed"
                        );
                    }
                    None => {
                        debug!(
                            camera_id = %event.camera_id,
                            outcome = ?event.outcome,
                            "transcoder exit for already-removed session"
                        );
                    }
                }
            }
        });
    }

    /// Start a session for `camera_id`, or touch the existing one.
    ///
    /// Concurrent starts for one camera are linearized through the
    /// registry: exactly one spawns a transcoder, every caller gets the
    /// same session descriptor. A launch failure is returned to the
    /// caller and leaves no registry entry behind.
    pub fn start(&self, camera_id: &str, source_url: &str) -> crate::Result<SessionInfo> {
        let limit = self.config.app.max_concurrent_sessions;
        if self.registry.get(camera_id).is_none() && self.registry.len() >= limit {
            return Err(crate::StreamError::SessionLimit(limit));
        }

        let (session, created) = self.registry.insert_if_absent(camera_id, || {
            let process = self.supervisor.spawn(camera_id, source_url)?;
            let session = Arc::new(Session::new(camera_id, source_url, process));
            // Spawn success is the first sign of life.
            session.set_state(SessionState::Running);
            Ok::<_, crate::StreamError>(session)
        })?;

        if created {
            self.tracker.register(camera_id);
            info!(
                camera_id,
                source_url,
                pid = session.process().pid(),
                "session started"
            );
        } else {
            self.tracker.touch(camera_id);
            debug!(camera_id, "session already live, touched");
        }

        Ok(self.describe(&session, Utc::now()))
    }

    /// Stop the session for `camera_id`. Idempotent: returns `false` when
    /// no session was live. The registry entry is removed before the
    /// process is terminated, so a concurrent exit event finds nothing.
    pub async fn stop(&self, camera_id: &str) -> bool {
        let Some(session) = self.registry.remove(camera_id) else {
            debug!(camera_id, "stop for absent session");
            return false;
        };

        self.tracker.forget(camera_id);
        session.set_state(SessionState::Stopping);
        info!(camera_id, pid = session.process().pid(), "stopping session");

        session
            .process()
            .terminate(self.config.streaming.termination_grace())
            .await;
        session.set_state(SessionState::Terminated);
        true
    }

    /// Stop every session and wait for all terminations. Called at host
    /// shutdown so no transcoder outlives the manager.
    pub async fn stop_all(&self) {
        let snapshot = self.registry.snapshot();
        if snapshot.is_empty() {
            return;
        }

        info!(count = snapshot.len(), "stopping all sessions");
        futures::future::join_all(snapshot.iter().map(|(id, _)| self.stop(id))).await;
    }

    /// Record a consumer access. Unknown ids are a harmless no-op.
    pub fn touch(&self, camera_id: &str) {
        self.tracker.touch(camera_id);
    }

    pub fn get(&self, camera_id: &str) -> Option<SessionInfo> {
        let session = self.registry.get(camera_id)?;
        Some(self.describe(&session, Utc::now()))
    }

    /// Session summaries for the status surface. Entries whose process has
    /// already exited are dropped (and removed) here as well, so `list`
    /// never reports a dead session as live even if the exit event is
    /// still in flight.
    pub fn list(&self) -> Vec<SessionInfo> {
        let now = Utc::now();
        self.registry
            .snapshot()
            .into_iter()
            .filter_map(|(camera_id, session)| {
                if session.process().has_exited() {
                    if self.registry.remove(&camera_id).is_some() {
                        self.tracker.forget(&camera_id);
                        session.set_state(SessionState::Terminated);
                        debug!(camera_id, "pruned dead session from listing");
                    }
                    return None;
                }
                Some(self.describe(&session, now))
            })
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    fn describe(&self, session: &Session, now: DateTime<Utc>) -> SessionInfo {
        SessionInfo {
            camera_id: session.camera_id().to_string(),
            source_url: session.source_url().to_string(),
            state: session.state(),
            pid: session.process().pid(),
            started_at: session.started_at(),
            last_accessed_at: self.tracker.last_access(session.camera_id()),
            idle_seconds: self
                .tracker
                .idle_duration(session.camera_id(), now)
                .map(|d| d.as_secs()),
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn fake_transcoder(dir: &Path, body: &str) -> String {
        let path = dir.join("fake-transcoder.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{}", body).unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    fn test_manager(dir: &Path, body: &str) -> SessionManager {
        let mut config = Config::default();
        config.streaming.ffmpeg_binary = fake_transcoder(dir, body);
        config.streaming.output_root = dir.join("streams");
        config.streaming.termination_grace_seconds = 2;
        SessionManager::new(Arc::new(config))
    }

    #[tokio::test]
    async fn test_start_is_idempotent_per_camera() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path(), "sleep 30");

        let first = manager.start("cam1", "rtsp://example/stream").unwrap();
        let second = manager.start("cam1", "rtsp://example/stream").unwrap();

        assert_eq!(first.pid, second.pid);
        assert_eq!(manager.session_count(), 1);

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path(), "sleep 30");

        manager.start("cam1", "rtsp://example/stream").unwrap();
        assert!(manager.stop("cam1").await);
        assert!(!manager.stop("cam1").await);
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_launch_failure_leaves_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.streaming.ffmpeg_binary = "/nonexistent/transcoder".to_string();
        config.streaming.output_root = dir.path().join("streams");
        let manager = SessionManager::new(Arc::new(config));

        let result = manager.start("cam1", "rtsp://example/stream");
        assert!(matches!(result, Err(crate::StreamError::Launch { .. })));
        assert_eq!(manager.session_count(), 0);

        // A retry for the same camera is free to run.
        let retry = manager.start("cam1", "rtsp://example/stream");
        assert!(retry.is_err());
    }

    #[tokio::test]
    async fn test_session_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.app.max_concurrent_sessions = 1;
        config.streaming.ffmpeg_binary = fake_transcoder(dir.path(), "sleep 30");
        config.streaming.output_root = dir.path().join("streams");
        let manager = SessionManager::new(Arc::new(config));

        manager.start("cam1", "rtsp://example/a").unwrap();
        let second = manager.start("cam2", "rtsp://example/b");
        assert!(matches!(second, Err(crate::StreamError::SessionLimit(1))));

        // Starting the already-live camera is still fine.
        assert!(manager.start("cam1", "rtsp://example/a").is_ok());

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_self_exit_pruned_from_list() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path(), "exit 1");

        let info = manager.start("cam1", "rtsp://example/stream").unwrap();
        let session = manager.registry.get("cam1");

        // Wait for the process to die, then the listing must not show it.
        if let Some(session) = session {
            session.process().wait_for_exit().await;
        }
        assert!(manager.list().iter().all(|s| s.camera_id != info.camera_id));
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_touch_unknown_camera_never_creates_entry() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path(), "sleep 30");

        manager.touch("ghost");
        assert_eq!(manager.session_count(), 0);
        assert!(manager.get("ghost").is_none());
    }
}
