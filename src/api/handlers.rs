//! API request handlers

use anyhow::Result;
use serde_json::Value;

use crate::processing::VideoIndexer;
use crate::timecode::parse_time_query;

/// Handle health check requests
pub async fn health_check() -> Result<Value> {
    Ok(serde_json::json!({
        "status": "healthy",
        "service": "video-indexer",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Handle video listing requests
pub async fn list_videos(indexer: &VideoIndexer) -> Result<Value> {
    let videos = indexer.list_videos().await?;
    Ok(serde_json::json!({
        "total": videos.len(),
        "videos": videos,
    }))
}

/// Handle search requests, optionally grouped by video
pub async fn search(indexer: &VideoIndexer, query: &str, group: bool) -> Result<Value> {
    if group {
        let grouped = indexer.search_by_video(query).await;
        return Ok(serde_json::json!({
            "query": query,
            "total": grouped.values().map(Vec::len).sum::<usize>(),
            "videos": grouped,
        }));
    }

    let records = indexer.search(query).await;
    Ok(serde_json::json!({
        "query": query,
        "total": records.len(),
        "records": records,
    }))
}

/// Handle "what happened around this moment" requests
pub async fn records_near(indexer: &VideoIndexer, video_name: &str, time: &str, tolerance: f64) -> Result<Value> {
    let seconds = parse_time_query(time)?;
    let records = indexer.records_near(video_name, seconds, tolerance).await?;
    Ok(serde_json::json!({
        "video_name": video_name,
        "seconds": seconds,
        "tolerance": tolerance,
        "records": records,
    }))
}

pub async fn timestamps(indexer: &VideoIndexer, video_name: &str) -> Result<Value> {
    let timestamps = indexer.timestamps(video_name).await?;
    Ok(serde_json::json!({
        "video_name": video_name,
        "timestamps": timestamps,
    }))
}

pub async fn stats(indexer: &VideoIndexer, video_name: &str) -> Result<Value> {
    Ok(serde_json::to_value(indexer.stats(video_name).await?)?)
}

pub async fn reset(indexer: &VideoIndexer) -> Result<Value> {
    indexer.reset().await?;
    Ok(serde_json::json!({ "reset": true }))
}

/// Index an uploaded video body
pub async fn process_upload(indexer: &VideoIndexer, video_name: &str, bytes: &[u8]) -> Result<Value> {
    let result = indexer.process_bytes(bytes, video_name).await?;
    Ok(serde_json::to_value(result)?)
}
