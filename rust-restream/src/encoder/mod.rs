//! Encoder adapter: ffmpeg argument construction, progress parsing and
//! process lifecycle.

pub mod args;
pub mod ffmpeg_parser;
mod process;
mod traits;

pub use process::{FfmpegLauncher, FfmpegProcess};
pub use traits::{
    EncodeJob, EncodeProfile, EncoderLauncher, EncoderProcess, ExitInfo, OutputProgress,
    ProgressSample, TerminationOutcome,
};
