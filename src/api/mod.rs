//! HTTP API over the metadata store
//!
//! Exposes search, per-video timelines and uploads to viewers.

use anyhow::Result;
use tracing::info;

use crate::processing::VideoIndexer;

pub mod handlers;
pub mod models;
pub mod server;

pub use server::router;

/// API Server for handling REST requests
pub struct ApiServer {
    indexer: VideoIndexer,
    port: u16,
}

impl ApiServer {
    pub fn new(indexer: VideoIndexer, port: u16) -> Self {
        Self { indexer, port }
    }

    /// Start the API server
    pub async fn start(self) -> Result<()> {
        info!("🚀 Starting API server on port {}", self.port);
        server::start_http_server(self.indexer, self.port).await
    }
}
