//! Tracksmith - a media acquisition and transformation pipeline
//!
//! This library fetches audio/video from remote sources (yt-dlp extraction,
//! direct file transfer), transforms it with ffmpeg (trim, compress, merge),
//! and delivers the result through a pluggable chat-delivery boundary, with
//! strict size/duration ceilings and guaranteed temp-file cleanup.

pub mod acquire;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod guard;
pub mod merge;
pub mod pipeline;
pub mod session;
pub mod shortvideo;
pub mod tempfiles;
pub mod timecode;
pub mod transcribe;
pub mod transform;
pub mod utils;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use delivery::ChatDelivery;
pub use pipeline::MediaPipeline;

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error taxonomy for the pipeline. Every variant is caught at the request
/// boundary and rendered as a user-facing status message; none crash the
/// process.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Extraction timed out after {0} seconds")]
    AcquisitionTimeout(u64),

    #[error("Extraction finished but produced no audio file")]
    NoArtifactProduced,

    #[error("{0}")]
    RequestTooLarge(String),

    #[error("End time must be after start time")]
    InvalidRange,

    #[error("At least two audio files must be queued before merging")]
    InsufficientInputs,

    #[error("No active trim session for this user")]
    SessionNotFound,

    #[error("Upstream tool failed: {0}")]
    UpstreamFailure(String),

    #[error("All API keys in the pool are rate limited")]
    RateLimitExhausted,
}
