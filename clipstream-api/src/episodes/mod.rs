//! The asynchronous episode post-pass: transcribe the finished upload, ask
//! the LLM for episode boundaries, cut and publish each episode as its own
//! single-rendition HLS asset.

pub mod job;
pub mod llm;
pub mod transcribe;

use thiserror::Error;

pub use job::EpisodeJob;
pub use llm::{EpisodePlan, LlmClient};
pub use transcribe::{TranscriptSegment, TranscriptionClient};

#[derive(Error, Debug)]
pub enum EpisodeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("response unreadable: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("media error: {0}")]
    Media(#[from] clipstream_media::MediaError),

    #[error(transparent)]
    Core(#[from] clipstream_core::Error),

    #[error("no stream-key mapping for {0}")]
    NoMapping(String),

    #[error("unusable episode plan: {0}")]
    BadPlan(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EpisodeError>;
