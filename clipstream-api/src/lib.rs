//! HTTP surface and processing pipeline for clipstream.
//!
//! The hook server accepts multipart uploads and RTMP lifecycle hooks, the
//! pipeline turns raw videos into HLS assets in two phases, and the episode
//! module runs the optional transcription/LLM post-pass.

pub mod episodes;
pub mod http;
pub mod pipeline;
