//! Outbound stream-event queue.
//!
//! Events are pushed onto a Redis list; a separate worker drains them to do
//! downstream catalog bookkeeping. Wire shapes are fixed by that consumer.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::Serialize;
use tracing::debug;

use crate::Result;

/// Published after the primary pipeline phase succeeds.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamProcessedEvent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub stream_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Rendition names present in the master playlist.
    pub files: Vec<String>,
}

impl StreamProcessedEvent {
    #[must_use]
    pub fn new(stream_name: String, scheduler_id: Option<String>, files: Vec<String>) -> Self {
        Self {
            kind: "stream_processed",
            stream_name,
            scheduler_id,
            timestamp: Utc::now(),
            files,
        }
    }
}

/// Published when the nginx hook reports a stream starting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStartEvent {
    pub stream_id: String,
    pub input_url: String,
    pub output_url: String,
    pub variants: Vec<String>,
    pub action: &'static str,
}

impl StreamStartEvent {
    #[must_use]
    pub fn new(stream_id: String, input_url: String, output_url: String, variants: Vec<String>) -> Self {
        Self {
            stream_id,
            input_url,
            output_url,
            variants,
            action: "start",
        }
    }
}

/// Published when the nginx hook reports a stream stopping.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStopEvent {
    pub stream_id: String,
    pub action: &'static str,
}

impl StreamStopEvent {
    #[must_use]
    pub fn new(stream_id: String) -> Self {
        Self {
            stream_id,
            action: "stop",
        }
    }
}

#[derive(Clone)]
pub struct QueuePublisher {
    conn: redis::aio::ConnectionManager,
    queue_key: String,
}

impl QueuePublisher {
    #[must_use]
    pub fn new(conn: redis::aio::ConnectionManager, queue_key: String) -> Self {
        Self { conn, queue_key }
    }

    pub async fn publish<T: Serialize>(&self, event: &T) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(&self.queue_key, &payload).await?;
        debug!(queue = %self.queue_key, "Published stream event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_processed_shape() {
        let event = StreamProcessedEvent::new(
            "sk_A".to_string(),
            Some("sched-1".to_string()),
            vec!["1080p".to_string(), "720p".to_string()],
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stream_processed");
        assert_eq!(json["streamName"], "sk_A");
        assert_eq!(json["schedulerId"], "sched-1");
        assert_eq!(json["files"][0], "1080p");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_start_stop_shapes() {
        let start = StreamStartEvent::new(
            "s1".to_string(),
            "rtmp://in".to_string(),
            "https://out".to_string(),
            vec!["1080p".to_string()],
        );
        let json = serde_json::to_value(&start).unwrap();
        assert_eq!(json["action"], "start");
        assert_eq!(json["streamId"], "s1");
        assert_eq!(json["inputUrl"], "rtmp://in");

        let stop = StreamStopEvent::new("s1".to_string());
        let json = serde_json::to_value(&stop).unwrap();
        assert_eq!(json["action"], "stop");
    }
}
