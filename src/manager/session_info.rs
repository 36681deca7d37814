use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one camera's transcoding session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Starting,
    Running,
    Stopping,
    Terminated,
}

/// Point-in-time summary of a session, shaped for the status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub camera_id: String,
    pub source_url: String,
    pub state: SessionState,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub idle_seconds: Option<u64>,
}

impl SessionInfo {
    pub fn is_live(&self) -> bool {
        matches!(self.state, SessionState::Starting | SessionState::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_live() {
        let mut info = SessionInfo {
            camera_id: "cam1".to_string(),
            source_url: "rtsp://example/stream".to_string(),
            state: SessionState::Running,
            pid: 42,
            started_at: Utc::now(),
            last_accessed_at: None,
            idle_seconds: None,
        };
        assert!(info.is_live());

        info.state = SessionState::Terminated;
        assert!(!info.is_live());
    }
}
