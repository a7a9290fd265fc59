//! Video container inspection
//!
//! Reads frame count, frame rate and dimensions of the first video stream.
//! The default backend shells out to `ffprobe` and parses its JSON output;
//! anything implementing [`VideoProbe`] can stand in for it.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use tracing::debug;

use crate::error::VideoError;

/// Stream metadata for one video.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub num_frames: u64,
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
}

impl VideoInfo {
    /// Trial length in seconds. `None` if the frame rate is unusable.
    pub fn trial_length(&self) -> Option<f64> {
        trial_length(Some(self.num_frames), Some(self.frame_rate))
    }
}

/// `num_frames / frame_rate` when both are known and the rate is positive.
pub fn trial_length(num_frames: Option<u64>, frame_rate: Option<f64>) -> Option<f64> {
    match (num_frames, frame_rate) {
        (Some(frames), Some(fps)) if fps > 0.0 && fps.is_finite() => Some(frames as f64 / fps),
        _ => None,
    }
}

pub trait VideoProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<VideoInfo, VideoError>;
}

/// Reject paths that cannot hold a video before spawning anything.
pub fn check_readable(path: &Path) -> Result<(), VideoError> {
    let meta = std::fs::metadata(path).map_err(|_| VideoError::Missing)?;
    if !meta.is_file() {
        return Err(VideoError::Missing);
    }
    if meta.len() == 0 {
        return Err(VideoError::Empty);
    }
    Ok(())
}

// ============================================================================
// ffprobe backend
// ============================================================================

#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    program: String,
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl FfprobeProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl VideoProbe for FfprobeProbe {
    fn probe(&self, path: &Path) -> Result<VideoInfo, VideoError> {
        check_readable(path)?;

        let output = Command::new(&self.program)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,avg_frame_rate,r_frame_rate,nb_frames,duration:format=duration",
                "-of",
                "json",
            ])
            .arg(path)
            .output()
            .map_err(|_| VideoError::ProbeUnavailable(self.program.clone()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.trim();
            return Err(VideoError::ProbeFailed(if reason.is_empty() {
                format!("exit status {}", output.status)
            } else {
                reason.to_string()
            }));
        }

        let info = parse_ffprobe_json(&output.stdout)?;
        debug!(
            path = %path.display(),
            frames = info.num_frames,
            fps = info.frame_rate,
            "probed video"
        );
        Ok(info)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Interpret `ffprobe -of json` output for the first video stream.
pub fn parse_ffprobe_json(bytes: &[u8]) -> Result<VideoInfo, VideoError> {
    let parsed: ProbeOutput =
        serde_json::from_slice(bytes).map_err(|e| VideoError::Malformed(e.to_string()))?;

    let stream = parsed.streams.first().ok_or(VideoError::NoVideoStream)?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(VideoError::Malformed("missing frame dimensions".to_string())),
    };

    let frame_rate = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rational)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rational))
        .ok_or_else(|| VideoError::Malformed("missing frame rate".to_string()))?;

    // Some containers (mkv, webm) do not record a frame count
    let num_frames = match stream.nb_frames.as_deref().and_then(|n| n.parse::<u64>().ok()) {
        Some(n) if n > 0 => n,
        _ => {
            let duration = stream
                .duration
                .as_deref()
                .or(parsed.format.as_ref().and_then(|f| f.duration.as_deref()))
                .and_then(|d| d.parse::<f64>().ok())
                .filter(|d| d.is_finite() && *d > 0.0)
                .ok_or_else(|| VideoError::Malformed("missing frame count".to_string()))?;
            (duration * frame_rate).round() as u64
        }
    };

    Ok(VideoInfo {
        num_frames,
        frame_rate,
        width,
        height,
    })
}

/// Parse `30000/1001` or `25`. `0/0` and non-positive rates are `None`.
fn parse_rational(s: &str) -> Option<f64> {
    let value = match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => s.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}
