//! Bounded capture flows built on [`crate::supervisor::run_bounded`]:
//! one-shot clip recording and source reachability probes. Unlike the
//! streaming sessions these runs have a natural end, so they never enter
//! the registry.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{CaptureConfig, StreamingConfig};
use crate::supervisor::{run_bounded, BoundedOutcome};

/// Slack on top of the requested clip duration before the recorder is
/// considered stuck and killed.
const CLIP_OVERRUN_SLACK: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct ClipFile {
    pub camera_id: String,
    pub path: PathBuf,
    pub duration_seconds: u32,
    pub size_bytes: u64,
    pub recorded_at: DateTime<Utc>,
}

pub struct CaptureService {
    ffmpeg_binary: String,
    config: CaptureConfig,
}

impl CaptureService {
    pub fn new(streaming: &StreamingConfig, config: CaptureConfig) -> Self {
        Self {
            ffmpeg_binary: streaming.ffmpeg_binary.clone(),
            config,
        }
    }

    /// Record a bounded clip from `source_url` by stream copy.
    ///
    /// The run is capped at the requested duration plus slack; a recorder
    /// that overruns is killed and reported as a capture failure for this
    /// camera only.
    pub async fn record_clip(
        &self,
        camera_id: &str,
        source_url: &str,
        duration_seconds: Option<u32>,
    ) -> crate::Result<ClipFile> {
        let duration = duration_seconds
            .unwrap_or(self.config.default_clip_seconds)
            .min(self.config.max_clip_seconds);

        std::fs::create_dir_all(&self.config.clip_root)?;
        let file_name = format!(
            "{}_{}_{}.mp4",
            camera_id,
            Utc::now().format("%Y%m%d%H%M%S"),
            Uuid::new_v4().simple()
        );
        let path = self.config.clip_root.join(file_name);

        let args = vec![
            "-nostdin".to_string(),
            "-i".to_string(),
            source_url.to_string(),
            "-t".to_string(),
            duration.to_string(),
            "-c".to_string(),
            "copy".to_string(),
            path.to_string_lossy().to_string(),
        ];

        info!(camera_id, duration, path = %path.display(), "recording clip");

        let limit = Duration::from_secs(duration as u64) + CLIP_OVERRUN_SLACK;
        let outcome = run_bounded(&self.ffmpeg_binary, &args, limit).await?;

        match outcome {
            BoundedOutcome::Completed(status) if status.success() && path.exists() => {
                let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                info!(camera_id, size_bytes, "clip recorded");
                Ok(ClipFile {
                    camera_id: camera_id.to_string(),
                    path,
                    duration_seconds: duration,
                    size_bytes,
                    recorded_at: Utc::now(),
                })
            }
            BoundedOutcome::Completed(status) => {
                warn!(camera_id, ?status, "clip recording failed");
                let _ = std::fs::remove_file(&path);
                Err(crate::StreamError::Capture {
                    camera_id: camera_id.to_string(),
                    reason: format!("recorder exited with {:?}", status.code()),
                })
            }
            BoundedOutcome::TimedOut => {
                let _ = std::fs::remove_file(&path);
                Err(crate::StreamError::Capture {
                    camera_id: camera_id.to_string(),
                    reason: "recorder overran its duration and was killed".to_string(),
                })
            }
        }
    }

    /// Check whether `source_url` currently yields a readable stream. Exit
    /// code 0 within the probe timeout means reachable; a hung probe is
    /// killed and counts as unreachable.
    pub async fn probe_source(&self, source_url: &str) -> crate::Result<bool> {
        let mut args = Vec::new();
        if source_url.starts_with("rtsp://") {
            args.push("-rtsp_transport".to_string());
            args.push("tcp".to_string());
        }
        args.extend([
            "-i".to_string(),
            source_url.to_string(),
            "-t".to_string(),
            "5".to_string(),
            "-f".to_string(),
            "null".to_string(),
            "-".to_string(),
        ]);

        let limit = Duration::from_secs(self.config.probe_timeout_seconds);
        let outcome = run_bounded(&self.ffmpeg_binary, &args, limit).await?;
        Ok(outcome.success())
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn fake_recorder(dir: &Path, body: &str) -> String {
        let path = dir.join("fake-recorder.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{}", body).unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    fn test_service(binary: String, dir: &Path) -> CaptureService {
        CaptureService {
            ffmpeg_binary: binary,
            config: CaptureConfig {
                clip_root: dir.join("clips"),
                default_clip_seconds: 5,
                max_clip_seconds: 60,
                probe_timeout_seconds: 1,
            },
        }
    }

    #[tokio::test]
    async fn test_record_clip_success() {
        let dir = tempfile::tempdir().unwrap();
        // Writes its last argument (the output path) and exits cleanly.
        let binary = fake_recorder(
            dir.path(),
            "for a; do last=\"$a\"; done\necho data > \"$last\"",
        );
        let service = test_service(binary, dir.path());

        let clip = service
            .record_clip("cam1", "rtsp://example/stream", Some(10))
            .await
            .unwrap();
        assert_eq!(clip.camera_id, "cam1");
        assert_eq!(clip.duration_seconds, 10);
        assert!(clip.path.exists());
        assert!(clip.size_bytes > 0);
    }

    #[tokio::test]
    async fn test_record_clip_clamps_duration() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_recorder(
            dir.path(),
            "for a; do last=\"$a\"; done\necho data > \"$last\"",
        );
        let service = test_service(binary, dir.path());

        let clip = service
            .record_clip("cam1", "rtsp://example/stream", Some(10_000))
            .await
            .unwrap();
        assert_eq!(clip.duration_seconds, 60);
    }

    #[tokio::test]
    async fn test_record_clip_failure_attributed_to_camera() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_recorder(dir.path(), "exit 1");
        let service = test_service(binary, dir.path());

        let result = service
            .record_clip("cam7", "rtsp://example/stream", None)
            .await;
        assert!(matches!(
            result,
            Err(crate::StreamError::Capture { ref camera_id, .. }) if camera_id == "cam7"
        ));
    }

    #[tokio::test]
    async fn test_probe_classifies_exit_code() {
        let dir = tempfile::tempdir().unwrap();

        let ok = test_service(fake_recorder(dir.path(), "exit 0"), dir.path());
        assert!(ok.probe_source("rtsp://example/stream").await.unwrap());

        let bad = test_service(fake_recorder(dir.path(), "exit 1"), dir.path());
        assert!(!bad.probe_source("rtsp://example/stream").await.unwrap());
    }

    #[tokio::test]
    async fn test_probe_timeout_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(fake_recorder(dir.path(), "sleep 30"), dir.path());
        assert!(!service.probe_source("rtsp://example/stream").await.unwrap());
    }
}
