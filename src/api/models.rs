//! API data models

use serde::{Deserialize, Serialize};

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// `GET /api/search`
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    /// Partition results by video
    #[serde(default)]
    pub group: bool,
}

/// `GET /api/videos/:name/near`
#[derive(Debug, Deserialize)]
pub struct NearQuery {
    /// `HH:MM:SS` or seconds
    pub t: String,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_tolerance() -> f64 {
    1.0
}
