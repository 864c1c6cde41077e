//! FFmpeg output parsing utilities.
//!
//! Parses the periodic stats line ffmpeg writes to stderr:
//! `frame=X fps=X q=X size=XkB time=HH:MM:SS.ms bitrate=Xkbits/s speed=Xx`

use super::OutputProgress;

/// Parse time string in HH:MM:SS.ms format to seconds.
///
/// # Examples
/// ```ignore
/// assert_eq!(parse_time("00:00:10.50"), Some(10.5));
/// assert_eq!(parse_time("01:30:00.00"), Some(5400.0));
/// assert_eq!(parse_time("invalid"), None);
/// ```
pub fn parse_time(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse the size field (e.g. `size=    1024kB` or `size=1024KiB`) in bytes.
pub fn parse_size(line: &str) -> Option<u64> {
    let size_start = line.find("size=")?;
    let size_str = &line[size_start + 5..].trim_start();
    let end = size_str.find(['k', 'K'])?;
    let size: u64 = size_str[..end].trim().parse().ok()?;
    Some(size * 1024)
}

/// Parse the encoded frame count (e.g. `frame=  100`).
pub fn parse_frame(line: &str) -> Option<u64> {
    let frame_start = line.find("frame=")?;
    let frame_str = line[frame_start + 6..].trim_start();
    let end = frame_str
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(frame_str.len());
    frame_str[..end].parse().ok()
}

/// Parse speed multiplier (e.g. `speed=1.00x`).
pub fn parse_speed(line: &str) -> Option<f64> {
    let speed_start = line.find("speed=")?;
    let speed_str = &line[speed_start + 6..];
    let end = speed_str.find('x')?;
    speed_str[..end].trim().parse().ok()
}

/// Parse bitrate (e.g. `bitrate=2097.2kbits/s`) in bytes per second.
pub fn parse_bitrate(line: &str) -> Option<u64> {
    let bitrate_start = line.find("bitrate=")?;
    let bitrate_str = &line[bitrate_start + 8..];
    let end = bitrate_str.find("kbits/s")?;
    let bitrate: f64 = bitrate_str[..end].trim().parse().ok()?;
    Some((bitrate * 1024.0 / 8.0) as u64)
}

/// Parse the output timestamp (e.g. `time=00:01:30.50`) in seconds.
pub fn parse_time_field(line: &str) -> Option<f64> {
    let time_start = line.find(" time=").map(|i| i + 1).or_else(|| {
        line.starts_with("time=").then_some(0)
    })?;
    let time_str = &line[time_start + 5..];
    let end = time_str.find(' ').unwrap_or(time_str.len());
    parse_time(&time_str[..end])
}

/// Parse one ffmpeg stats line.
///
/// Requires `time=` plus `frame=` or `size=`, so unrelated log lines that
/// happen to mention one of the keys are ignored.
pub fn parse_progress(line: &str) -> Option<OutputProgress> {
    if !line.contains("time=") || !(line.contains("frame=") || line.contains("size=")) {
        return None;
    }

    Some(OutputProgress {
        bytes_written: parse_size(line).unwrap_or(0),
        frames: parse_frame(line).unwrap_or(0),
        media_time_secs: parse_time_field(line).unwrap_or(0.0),
        bitrate_bytes_per_sec: parse_bitrate(line).unwrap_or(0),
        speed: parse_speed(line).unwrap_or(0.0),
    })
}

/// Whether a stderr line is worth surfacing as a failure reason.
pub fn is_error_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("error")
        || lower.contains("failed")
        || lower.contains("invalid")
        || lower.contains("connection refused")
        || lower.contains("broken pipe")
        || lower.contains("no such file")
}
