use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::manager::SessionInfo;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct StartSessionRequest {
    /// Upstream feed locator. Optional when a camera store is configured;
    /// the camera's stored source address is used then.
    #[validate(url)]
    pub source_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CaptureRequest {
    #[validate(url)]
    pub source_url: Option<String>,
    #[validate(range(min = 1))]
    pub duration_seconds: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ProbeRequest {
    pub camera_id: Option<String>,
    #[validate(url)]
    pub source_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
    pub total_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopResponse {
    pub camera_id: String,
    pub stopped: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopAllResponse {
    pub stopped_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub source_url: String,
    pub reachable: bool,
}

/// Camera ids become path segments under the output root; anything but a
/// plain token is rejected before it reaches the filesystem.
pub fn validate_camera_id(id: &str) -> Result<(), super::ApiError> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !id.starts_with('.');

    if valid {
        Ok(())
    } else {
        Err(super::ApiError::ValidationError(format!(
            "invalid camera id: {:?}",
            id
        )))
    }
}
