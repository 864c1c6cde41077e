//! ffmpeg command line construction.

use crate::config::{EncoderConfig, OutputConfig};

use super::EncodeJob;

/// Scale to fit the target box keeping the aspect ratio, pad the rest,
/// square pixels, then optionally sharpen the upscaled picture.
pub fn video_filter(output: &OutputConfig, encoder: &EncoderConfig) -> String {
    let (w, h) = (output.width, output.height);
    let mut filter = format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease:flags={},\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1",
        encoder.scale_flags
    );
    if encoder.sharpen {
        filter.push_str(",unsharp=5:5:0.5:5:5:0.0");
    }
    filter
}

/// Build the full ffmpeg argument list for one job.
pub fn build_args(job: &EncodeJob) -> Vec<String> {
    let profile = &job.profile;
    let encoder = &profile.encoder;
    let output = &profile.output;
    let mut args = Vec::new();

    // 1. Global options
    args.extend([
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "info".to_string(),
    ]);

    // 2. Inputs
    args.extend(job.input.input_args(&encoder.input_args));
    args.extend(job.input.map_args());

    // 3. Video
    args.extend([
        "-vf".to_string(),
        video_filter(output, encoder),
        "-r".to_string(),
        output.frame_rate.to_string(),
        "-c:v".to_string(),
        encoder.video_codec.clone(),
        "-preset".to_string(),
        encoder.preset.clone(),
    ]);
    if let Some(ref tune) = encoder.tune {
        args.extend(["-tune".to_string(), tune.clone()]);
    }
    args.extend([
        "-b:v".to_string(),
        encoder.video_bitrate.clone(),
        "-maxrate".to_string(),
        encoder.max_rate.clone(),
        "-bufsize".to_string(),
        encoder.buffer_size.clone(),
        "-g".to_string(),
        encoder.gop.to_string(),
        "-keyint_min".to_string(),
        encoder.keyint_min.to_string(),
        "-pix_fmt".to_string(),
        encoder.pixel_format.clone(),
    ]);

    // 4. Audio
    args.extend([
        "-c:a".to_string(),
        encoder.audio_codec.clone(),
        "-b:a".to_string(),
        encoder.audio_bitrate.clone(),
        "-ar".to_string(),
        encoder.audio_sample_rate.to_string(),
    ]);

    // 5. Ownership marker, found again by the orphan sweep
    args.extend(["-metadata".to_string(), profile.owner_marker.clone()]);

    if let Some(duration) = job.duration {
        args.extend(["-t".to_string(), format!("{:.3}", duration.as_secs_f64())]);
    }

    // 6. Extra output arguments from config
    args.extend(encoder.output_args.iter().cloned());

    // 7. Output
    args.extend([
        "-f".to_string(),
        encoder.output_format.clone(),
        job.endpoint_url.clone(),
    ]);

    args
}
