//! Transcoder process supervision.
//!
//! This module owns every interaction with the external transcoder:
//! 1. Command construction for continuous HLS delivery.
//! 2. Spawning with stderr piped into the log stream.
//! 3. Exit observation via a dedicated wait task per process.
//! 4. Graceful-then-forced termination.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::StreamingConfig;

pub mod bounded;
pub use bounded::{run_bounded, BoundedOutcome};

/// Bounded wait after a force kill. SIGKILL cannot be ignored; this only
/// covers the scheduler delay before the exit is observed.
const FORCE_KILL_WAIT: Duration = Duration::from_secs(5);

/// How a supervised process left the process table.
#[derive(Debug, Clone, Copy)]
pub enum ExitOutcome {
    Exited(std::process::ExitStatus),
    /// wait() itself failed; the process can no longer be observed.
    Lost,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Exited(status) if status.success())
    }
}

/// Delivered to the session manager whenever a supervised process exits,
/// whether terminated on request or dead on its own.
#[derive(Debug, Clone)]
pub struct ExitEvent {
    pub camera_id: String,
    pub outcome: ExitOutcome,
}

/// Argument vector for one transcoder invocation.
#[derive(Debug, Clone)]
pub struct TranscoderCommand {
    binary: String,
    args: Vec<String>,
}

impl TranscoderCommand {
    /// Continuous RTSP-to-HLS delivery into `output_dir`.
    pub fn hls(config: &StreamingConfig, source_url: &str, output_dir: &Path) -> Self {
        let segment_pattern = output_dir.join("segment_%03d.ts");
        let playlist_path = output_dir.join("playlist.m3u8");

        let args = vec![
            "-nostdin".to_string(),
            "-i".to_string(),
            source_url.to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            config.segment_seconds.to_string(),
            "-hls_list_size".to_string(),
            config.playlist_length.to_string(),
            "-hls_flags".to_string(),
            "delete_segments".to_string(),
            "-hls_segment_filename".to_string(),
            segment_pattern.to_string_lossy().to_string(),
            playlist_path.to_string_lossy().to_string(),
        ];

        Self {
            binary: config.ffmpeg_binary.clone(),
            args,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Exclusive handle to one supervised transcoder process.
///
/// The `Child` itself lives inside the wait task; the handle only carries
/// the pid, the exit watch and the force-kill trigger, so terminating and
/// waiting never contend on the process object.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: u32,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
    kill_signal: Arc<Notify>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    pub fn exit_outcome(&self) -> Option<ExitOutcome> {
        *self.exit_rx.borrow()
    }

    /// Wait until the process has exited and its status was observed.
    pub async fn wait_for_exit(&self) -> ExitOutcome {
        let mut rx = self.exit_rx.clone();
        let outcome = match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(guard) => (*guard).unwrap_or(ExitOutcome::Lost),
            // Wait task gone without publishing; nothing left to observe.
            Err(_) => ExitOutcome::Lost,
        };
        outcome
    }

    /// Graceful-then-forced termination.
    ///
    /// Requests cooperative shutdown, waits up to `grace`, then force
    /// kills. Safe to call on an already-terminated handle and safe to
    /// call concurrently; every caller returns within a bounded time.
    pub async fn terminate(&self, grace: Duration) {
        if self.has_exited() {
            return;
        }

        debug!(pid = self.pid, "requesting cooperative shutdown");
        self.request_shutdown();

        if timeout(grace, self.wait_for_exit()).await.is_ok() {
            return;
        }

        warn!(
            pid = self.pid,
            grace_secs = grace.as_secs(),
            "transcoder ignored shutdown request, force killing"
        );
        self.kill_signal.notify_one();

        if timeout(FORCE_KILL_WAIT, self.wait_for_exit()).await.is_err() {
            error!(pid = self.pid, "transcoder still observable after kill");
        }
    }

    #[cfg(unix)]
    fn request_shutdown(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        // The wait task has not reaped the process yet (has_exited was
        // false), so the pid still names our child or its zombie.
        if let Err(e) = kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM) {
            debug!(pid = self.pid, "SIGTERM failed: {}", e);
        }
    }

    #[cfg(not(unix))]
    fn request_shutdown(&self) {
        // No cooperative signal on this platform; go straight to kill.
        self.kill_signal.notify_one();
    }
}

/// Spawns and tracks transcoder processes. One instance serves every
/// camera; per-process state lives in the returned [`ProcessHandle`].
pub struct Supervisor {
    config: StreamingConfig,
    exit_tx: mpsc::UnboundedSender<ExitEvent>,
}

impl Supervisor {
    /// The receiver side carries one [`ExitEvent`] per process death and
    /// is consumed by the session manager.
    pub fn new(config: StreamingConfig) -> (Self, mpsc::UnboundedReceiver<ExitEvent>) {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        (Self { config, exit_tx }, exit_rx)
    }

    pub fn output_dir(&self, camera_id: &str) -> PathBuf {
        self.config.output_root.join(camera_id)
    }

    /// Spawn the HLS transcoder for one camera.
    ///
    /// Fails synchronously with [`crate::StreamError::Launch`] when the
    /// executable is missing or the OS rejects the spawn. Post-launch
    /// failures surface later through the exit event channel.
    pub fn spawn(&self, camera_id: &str, source_url: &str) -> crate::Result<ProcessHandle> {
        let output_dir = self.output_dir(camera_id);
        std::fs::create_dir_all(&output_dir).map_err(|e| crate::StreamError::Launch {
            camera_id: camera_id.to_string(),
            source: e,
        })?;

        let command = TranscoderCommand::hls(&self.config, source_url, &output_dir);
        debug!(
            camera_id,
            binary = command.binary(),
            "spawning transcoder: {:?}",
            command.args()
        );

        let mut child = Command::new(command.binary())
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| crate::StreamError::Launch {
                camera_id: camera_id.to_string(),
                source: e,
            })?;

        let pid = child.id().unwrap_or_default();
        info!(camera_id, pid, "transcoder started");

        // Drain diagnostics continuously so the process never blocks on a
        // full pipe. Lines go to the log stream, never to control flow.
        if let Some(stderr) = child.stderr.take() {
            let camera_id = camera_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        debug!(camera_id = %camera_id, "transcoder: {}", line.trim());
                    }
                }
            });
        }

        let (exit_watch_tx, exit_watch_rx) = watch::channel(None);
        let kill_signal = Arc::new(Notify::new());

        let camera_id_owned = camera_id.to_string();
        let exit_tx = self.exit_tx.clone();
        let kill_signal_task = kill_signal.clone();
        tokio::spawn(async move {
            let outcome = loop {
                tokio::select! {
                    res = child.wait() => {
                        break match res {
                            Ok(status) => ExitOutcome::Exited(status),
                            Err(e) => {
                                warn!(camera_id = %camera_id_owned, "wait failed: {}", e);
                                ExitOutcome::Lost
                            }
                        };
                    }
                    _ = kill_signal_task.notified() => {
                        if let Err(e) = child.start_kill() {
                            debug!(camera_id = %camera_id_owned, "kill failed: {}", e);
                        }
                    }
                }
            };

            debug!(camera_id = %camera_id_owned, pid, ?outcome, "transcoder exited");
            let _ = exit_watch_tx.send(Some(outcome));
            let _ = exit_tx.send(ExitEvent {
                camera_id: camera_id_owned,
                outcome,
            });
        });

        Ok(ProcessHandle {
            pid,
            exit_rx: exit_watch_rx,
            kill_signal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(output_root: &Path) -> StreamingConfig {
        StreamingConfig {
            output_root: output_root.to_path_buf(),
            segment_seconds: 4,
            playlist_length: 5,
            ..StreamingConfig::default()
        }
    }

    #[test]
    fn test_hls_command_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let command =
            TranscoderCommand::hls(&config, "rtsp://cam.local/stream", dir.path());

        let args = command.args();
        assert_eq!(args[0], "-nostdin");

        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input_pos + 1], "rtsp://cam.local/stream");

        let time_pos = args.iter().position(|a| a == "-hls_time").unwrap();
        assert_eq!(args[time_pos + 1], "4");

        let list_pos = args.iter().position(|a| a == "-hls_list_size").unwrap();
        assert_eq!(args[list_pos + 1], "5");

        assert!(args.last().unwrap().ends_with("playlist.m3u8"));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = StreamingConfig {
            ffmpeg_binary: "/nonexistent/transcoder-binary".to_string(),
            ..test_config(dir.path())
        };
        let (supervisor, _exit_rx) = Supervisor::new(config);

        let result = supervisor.spawn("cam1", "rtsp://example/stream");
        assert!(matches!(
            result,
            Err(crate::StreamError::Launch { ref camera_id, .. }) if camera_id == "cam1"
        ));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        /// Stand-in transcoder: a shell script that ignores its arguments.
        fn fake_transcoder(dir: &Path, body: &str) -> String {
            let path = dir.join("fake-transcoder.sh");
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "#!/bin/sh\n{}", body).unwrap();
            drop(file);
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().to_string()
        }

        #[tokio::test]
        async fn test_self_exit_is_observed() {
            let dir = tempfile::tempdir().unwrap();
            let config = StreamingConfig {
                ffmpeg_binary: fake_transcoder(dir.path(), "exit 3"),
                ..test_config(dir.path())
            };
            let (supervisor, mut exit_rx) = Supervisor::new(config);

            let handle = supervisor.spawn("cam1", "rtsp://example/stream").unwrap();
            let outcome = handle.wait_for_exit().await;
            assert!(!outcome.success());

            let event = exit_rx.recv().await.unwrap();
            assert_eq!(event.camera_id, "cam1");
            assert!(handle.has_exited());
        }

        #[tokio::test]
        async fn test_terminate_is_idempotent() {
            let dir = tempfile::tempdir().unwrap();
            let config = StreamingConfig {
                ffmpeg_binary: fake_transcoder(dir.path(), "sleep 30"),
                ..test_config(dir.path())
            };
            let (supervisor, _exit_rx) = Supervisor::new(config);

            let handle = supervisor.spawn("cam1", "rtsp://example/stream").unwrap();
            assert!(!handle.has_exited());

            handle.terminate(Duration::from_secs(2)).await;
            assert!(handle.has_exited());

            // Second and concurrent calls return immediately.
            handle.terminate(Duration::from_secs(2)).await;
            let (first, second) = tokio::join!(
                handle.terminate(Duration::from_secs(2)),
                handle.terminate(Duration::from_secs(2))
            );
            let _ = (first, second);
        }

        #[tokio::test]
        async fn test_terminate_escalates_to_kill() {
            let dir = tempfile::tempdir().unwrap();
            // A transcoder that ignores SIGTERM.
            let config = StreamingConfig {
                ffmpeg_binary: fake_transcoder(dir.path(), "trap '' TERM\nsleep 30"),
                ..test_config(dir.path())
            };
            let (supervisor, _exit_rx) = Supervisor::new(config);

            let handle = supervisor.spawn("cam1", "rtsp://example/stream").unwrap();
            handle.terminate(Duration::from_millis(300)).await;
            assert!(handle.has_exited());
        }
    }
}
