use notify::{Event, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub api: ApiConfig,
    pub streaming: StreamingConfig,
    pub capture: CaptureConfig,
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub log_level: String,
    pub max_concurrent_sessions: usize,
    pub shutdown_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
    pub cors_enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Transcoder executable, resolved through PATH when not absolute.
    pub ffmpeg_binary: String,
    /// Root directory for per-camera playlist/segment output. Always
    /// explicit; the supervisor never consults the process working
    /// directory.
    pub output_root: PathBuf,
    pub segment_seconds: u32,
    pub playlist_length: u32,
    /// Seconds without a consumer touch before a session is reaped.
    pub idle_timeout_seconds: u64,
    /// Interval between reaper sweeps.
    pub reap_interval_seconds: u64,
    /// Bounded wait for cooperative transcoder shutdown before SIGKILL.
    pub termination_grace_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub clip_root: PathBuf,
    pub default_clip_seconds: u32,
    pub max_clip_seconds: u32,
    pub probe_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            api: ApiConfig::default(),
            streaming: StreamingConfig::default(),
            capture: CaptureConfig::default(),
            database: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "Camera Stream Manager".to_string(),
            log_level: "info".to_string(),
            max_concurrent_sessions: 16,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_seconds: 30,
            cors_enabled: true,
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        let output_root = if cfg!(windows) {
            PathBuf::from("C:\\ProgramData\\camera-stream-manager\\streams")
        } else {
            PathBuf::from("/var/lib/camera-stream-manager/streams")
        };

        Self {
            ffmpeg_binary: "ffmpeg".to_string(),
            output_root,
            segment_seconds: 10,
            playlist_length: 6,
            idle_timeout_seconds: 300,
            reap_interval_seconds: 60,
            termination_grace_seconds: 5,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: Some("sqlite://cameras.db".to_string()),
            max_connections: Some(5),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let clip_root = if cfg!(windows) {
            PathBuf::from("C:\\ProgramData\\camera-stream-manager\\clips")
        } else {
            PathBuf::from("/var/lib/camera-stream-manager/clips")
        };

        Self {
            clip_root,
            default_clip_seconds: 30,
            max_clip_seconds: 3600,
            probe_timeout_seconds: 10,
        }
    }
}

impl StreamingConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_seconds)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_seconds)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.app.max_concurrent_sessions == 0 {
            return Err("max_concurrent_sessions must be greater than 0".to_string());
        }

        if self.api.port == 0 {
            return Err("API port must be greater than 0".to_string());
        }

        if self.streaming.ffmpeg_binary.is_empty() {
            return Err("ffmpeg_binary must not be empty".to_string());
        }

        if self.streaming.segment_seconds == 0 {
            return Err("segment_seconds must be greater than 0".to_string());
        }

        if self.streaming.reap_interval_seconds == 0 {
            return Err("reap_interval_seconds must be greater than 0".to_string());
        }

        if self.streaming.idle_timeout_seconds < self.streaming.segment_seconds as u64 {
            return Err(
                "idle_timeout_seconds must be at least one segment duration".to_string(),
            );
        }

        if self.capture.max_clip_seconds == 0
            || self.capture.default_clip_seconds > self.capture.max_clip_seconds
        {
            return Err("default_clip_seconds must not exceed max_clip_seconds".to_string());
        }

        Ok(())
    }

    pub async fn from_file(path: &PathBuf) -> crate::Result<Self> {
        if !path.exists() {
            return Err(crate::StreamError::ConfigError(format!(
                "Configuration file not found: {:?}\n\
                Please create a config.toml file or specify the path with --config",
                path
            )));
        }

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            crate::StreamError::ConfigError(format!(
                "Failed to read configuration file {:?}: {}",
                path, e
            ))
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| {
            crate::StreamError::ConfigError(format!(
                "Failed to parse configuration file {:?}: {}",
                path, e
            ))
        })?;

        config.validate().map_err(crate::StreamError::ConfigError)?;
        Ok(config)
    }
}

pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    config_path: PathBuf,
    watcher: Option<notify::RecommendedWatcher>,
}

impl ConfigManager {
    pub async fn new(config_path: PathBuf) -> crate::Result<Self> {
        let config = if config_path.exists() {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(&config_path).await.map_err(|e| {
                error!("Failed to load configuration: {}", e);
                e
            })?
        } else {
            warn!(
                "Configuration file {:?} not found, using defaults",
                config_path
            );
            Config::default()
        };

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
            watcher: None,
        })
    }

    pub async fn get(&self) -> Config {
        self.config.read().await.clone()
    }

    pub async fn reload(&self) -> crate::Result<()> {
        info!("Reloading configuration from {:?}", self.config_path);
        let new_config = Config::from_file(&self.config_path).await?;
        *self.config.write().await = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    pub async fn start_watching(&mut self) -> crate::Result<()> {
        if !self.config_path.exists() {
            info!("Config file does not exist, hot-reload disabled");
            return Ok(());
        }

        let config_path = self.config_path.clone();
        let config_arc = self.config.clone();

        let (tx, mut rx) = tokio::sync::mpsc::channel(100);

        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    if event.paths.iter().any(|p| p == &config_path) {
                        let _ = tx.blocking_send(());
                    }
                }
            })
            .map_err(|e| crate::StreamError::ConfigError(e.to_string()))?;

        watcher
            .watch(&self.config_path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                crate::StreamError::ConfigError(format!(
                    "Failed to start config file watcher: {}",
                    e
                ))
            })?;

        self.watcher = Some(watcher);

        let config_path = self.config_path.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                info!("Configuration file changed, reloading...");
                match Config::from_file(&config_path).await {
                    Ok(new_config) => {
                        *config_arc.write().await = new_config;
                        info!("Configuration reloaded successfully");
                    }
                    Err(e) => {
                        error!("Failed to reload configuration: {}", e);
                    }
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.app.name, "Camera Stream Manager");
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.streaming.idle_timeout_seconds, 300);
        assert_eq!(config.streaming.reap_interval_seconds, 60);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[app]
name = "Test Manager"
log_level = "debug"

[api]
host = "127.0.0.1"
port = 9090

[streaming]
ffmpeg_binary = "/usr/bin/ffmpeg"
idle_timeout_seconds = 120
"#
        )
        .unwrap();

        let config = Config::from_file(&temp_file.path().to_path_buf())
            .await
            .unwrap();
        assert_eq!(config.app.name, "Test Manager");
        assert_eq!(config.api.port, 9090);
        assert_eq!(config.streaming.ffmpeg_binary, "/usr/bin/ffmpeg");
        assert_eq!(config.streaming.idle_timeout_seconds, 120);
        // Unspecified fields fall back to defaults
        assert_eq!(config.streaming.segment_seconds, 10);
    }

    #[tokio::test]
    async fn test_config_missing_file() {
        let path = PathBuf::from("/nonexistent/config.toml");
        assert!(Config::from_file(&path).await.is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.streaming.ffmpeg_binary = String::new();
        assert!(config.validate().is_err());
        config.streaming.ffmpeg_binary = "ffmpeg".to_string();

        config.streaming.idle_timeout_seconds = 1;
        assert!(config.validate().is_err());
        config.streaming.idle_timeout_seconds = 300;

        config.capture.default_clip_seconds = config.capture.max_clip_seconds + 1;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_config_manager_defaults_when_missing() {
        let manager = ConfigManager::new(PathBuf::from("/nonexistent/config.toml"))
            .await
            .unwrap();
        let config = manager.get().await;
        assert_eq!(config.api.port, 8080);
    }
}
