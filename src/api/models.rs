use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::pipeline::ViewState;
use crate::session::SessionHandle;

#[derive(Deserialize)]
pub struct CaptionRequest {
    pub url: String,
    /// Session to reset and reuse; a new one is created when absent or unknown.
    #[serde(default)]
    pub session_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct CaptionResponse {
    pub session_id: Uuid,
    #[serde(flatten)]
    pub view: ViewState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub processed_at: DateTime<Utc>,
}

/// Result of a previous/next request. When `moved` is false nothing else is set
/// and the viewer keeps what it shows.
#[derive(Serialize, Default)]
pub struct NavigationResponse {
    pub moved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Image URLs carry the batch generation so a resubmission never reuses one.
pub fn image_path(handle: SessionHandle, index: usize) -> String {
    format!(
        "/api/sessions/{}/batches/{}/images/{}",
        handle.id, handle.generation, index
    )
}
