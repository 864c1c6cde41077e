//! Encoder inputs: the live source or synthetic placeholder content.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::{OutputConfig, PlaceholderConfig};
use crate::source::SourceState;

/// Which kind of input a publisher is fed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InputKind {
    Source,
    Placeholder,
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "SOURCE"),
            Self::Placeholder => write!(f, "PLACEHOLDER"),
        }
    }
}

/// Synthetic looping input: a still image or a solid colour, plus silence
/// or a tone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderSpec {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub image: Option<PathBuf>,
    pub color: String,
    pub tone_hz: Option<u32>,
    pub sample_rate: u32,
}

/// Upstream input of one encoder process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputDescriptor {
    Source { url: String },
    Placeholder(PlaceholderSpec),
}

impl InputDescriptor {
    pub fn kind(&self) -> InputKind {
        match self {
            Self::Source { .. } => InputKind::Source,
            Self::Placeholder(_) => InputKind::Placeholder,
        }
    }

    /// The input for this cycle: the live source when it is online, the
    /// placeholder otherwise.
    pub fn for_source(state: &SourceState, placeholder: &InputDescriptor) -> Self {
        match state.ingest_url() {
            Some(url) => Self::Source {
                url: url.to_string(),
            },
            None => placeholder.clone(),
        }
    }

    /// ffmpeg arguments declaring the input(s). `extra` is placed before the
    /// live source input only; synthetic inputs take no user arguments.
    pub fn input_args(&self, extra: &[String]) -> Vec<String> {
        let mut args = Vec::new();
        match self {
            Self::Source { url } => {
                args.extend(extra.iter().cloned());
                args.extend(["-fflags".to_string(), "+genpts".to_string()]);
                args.extend(["-i".to_string(), url.clone()]);
            }
            Self::Placeholder(spec) => {
                args.push("-re".to_string());
                match &spec.image {
                    Some(image) => {
                        args.extend([
                            "-loop".to_string(),
                            "1".to_string(),
                            "-framerate".to_string(),
                            spec.frame_rate.to_string(),
                            "-i".to_string(),
                            image.to_string_lossy().into_owned(),
                        ]);
                    }
                    None => {
                        args.extend([
                            "-f".to_string(),
                            "lavfi".to_string(),
                            "-i".to_string(),
                            format!(
                                "color=c={}:s={}x{}:r={}",
                                spec.color, spec.width, spec.height, spec.frame_rate
                            ),
                        ]);
                    }
                }

                args.push("-re".to_string());
                let audio = match spec.tone_hz {
                    Some(hz) => format!("sine=frequency={hz}:sample_rate={}", spec.sample_rate),
                    None => format!(
                        "anullsrc=channel_layout=stereo:sample_rate={}",
                        spec.sample_rate
                    ),
                };
                args.extend([
                    "-f".to_string(),
                    "lavfi".to_string(),
                    "-i".to_string(),
                    audio,
                ]);
            }
        }
        args
    }

    /// Stream mapping for the inputs declared by [`InputDescriptor::input_args`].
    pub fn map_args(&self) -> Vec<String> {
        match self {
            Self::Source { .. } => vec![
                "-map".to_string(),
                "0:v:0".to_string(),
                "-map".to_string(),
                "0:a:0?".to_string(),
            ],
            Self::Placeholder(_) => vec![
                "-map".to_string(),
                "0:v:0".to_string(),
                "-map".to_string(),
                "1:a:0".to_string(),
            ],
        }
    }

    /// Short form for logs. Source URLs carry access tokens, so only the
    /// host is shown.
    pub fn describe(&self) -> String {
        match self {
            Self::Source { url } => match url::Url::parse(url) {
                Ok(parsed) => format!("source({})", parsed.host_str().unwrap_or("unknown")),
                Err(_) => "source".to_string(),
            },
            Self::Placeholder(spec) => match &spec.image {
                Some(image) => format!("placeholder(image {})", image.display()),
                None => format!("placeholder(color {})", spec.color),
            },
        }
    }
}

/// The placeholder input for the configured output geometry.
pub fn placeholder_source(placeholder: &PlaceholderConfig, output: &OutputConfig) -> InputDescriptor {
    InputDescriptor::Placeholder(PlaceholderSpec {
        width: output.width,
        height: output.height,
        frame_rate: output.frame_rate,
        image: placeholder.image.clone(),
        color: placeholder.color.clone(),
        tone_hz: placeholder.tone_hz,
        sample_rate: placeholder.sample_rate,
    })
}
