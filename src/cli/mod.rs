use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tracksmith",
    about = "Tracksmith - fetch, trim, merge, and transcribe audio from YouTube, TikTok, and local files",
    version,
    long_about = "A media pipeline CLI: downloads audio from URLs via yt-dlp, trims and merges \
with ffmpeg under strict size limits, resolves TikTok posts, and transcribes audio through a \
speech-to-text API."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download a URL as mp3
    Mp3 {
        /// Source URL (YouTube or anything yt-dlp understands)
        #[arg(value_name = "URL")]
        url: String,
    },

    /// Search YouTube for a track and download the best match
    Search {
        /// Free-text query
        #[arg(value_name = "QUERY", num_args = 1..)]
        query: Vec<String>,
    },

    /// Cut a section out of an audio file
    Cut {
        /// Input audio file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Start offset (e.g. 00:30); defaults to the beginning
        #[arg(short, long, value_name = "TIME")]
        start: Option<String>,

        /// End offset (e.g. 01:20); defaults to the end
        #[arg(short, long, value_name = "TIME")]
        end: Option<String>,
    },

    /// Concatenate two or more audio files in order
    Merge {
        /// Input audio files, merged in the given order
        #[arg(value_name = "FILES", num_args = 1..)]
        files: Vec<PathBuf>,
    },

    /// Transcribe an audio file to text
    Transcribe {
        /// Input audio file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Fetch a TikTok post (video or photos)
    Shortvideo {
        /// Post URL, shortened links included
        #[arg(value_name = "URL")]
        url: String,
    },

    /// Show or edit configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}
