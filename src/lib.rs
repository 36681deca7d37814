pub mod api;
pub mod capture;
pub mod config;
pub mod database;
pub mod manager;
pub mod reaper;
pub mod registry;
pub mod supervisor;
pub mod tracker;

// Re-export commonly used types
pub use config::{Config, ConfigManager};
pub use manager::SessionManager;

// Common error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Camera not found: {0}")]
    CameraNotFound(String),

    #[error("Failed to launch transcoder for camera {camera_id}: {source}")]
    Launch {
        camera_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Capture failed for camera {camera_id}: {reason}")]
    Capture { camera_id: String, reason: String },

    #[error("Session limit reached ({0} active)")]
    SessionLimit(usize),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StreamError>;
