//! Video decoding through an external `ffmpeg` process.
//!
//! `ffprobe` reports the stream's frame rate and `ffmpeg` decodes, scales and converts
//! frames to raw RGBA on its stdout, one `width * height * 4` byte record per frame.

use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use image::RgbaImage;
use tracing::{debug, warn};

use crate::{PanelError, Result};

/// File extensions accepted as video backgrounds (lowercase).
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov", "webm", "flv", "wmv", "m4v"];

/// Whether `path` has a supported video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// A sequential frame decoder.
pub trait VideoDecoder: Send {
    /// Declared frames per second, if the container reports one.
    fn fps(&self) -> Option<f64>;

    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbaImage>>;

    /// Seek back to the first frame.
    fn rewind(&mut self) -> Result<()>;
}

/// Opens a decoder producing `width` x `height` frames.
pub type VideoOpener = fn(&Path, u32, u32) -> Result<Box<dyn VideoDecoder>>;

/// Default [`VideoOpener`] backed by ffmpeg.
pub fn open_ffmpeg(path: &Path, width: u32, height: u32) -> Result<Box<dyn VideoDecoder>> {
    Ok(Box::new(FfmpegDecoder::open(path, width, height)?))
}

/// Decoder piping raw frames out of an `ffmpeg` child process.
pub struct FfmpegDecoder {
    path: PathBuf,
    width: u32,
    height: u32,
    fps: Option<f64>,
    child: Child,
    stdout: ChildStdout,
}

impl FfmpegDecoder {
    pub fn open(path: &Path, width: u32, height: u32) -> Result<Self> {
        let fps = probe_fps(path);
        let (child, stdout) = spawn_ffmpeg(path, width, height)?;
        debug!(path = %path.display(), ?fps, "Video decoder started");
        Ok(Self { path: path.to_path_buf(), width, height, fps, child, stdout })
    }

    fn stop_child(&mut self) {
        if let Err(e) = self.child.kill() {
            // Already exited.
            debug!(error = %e, "ffmpeg kill");
        }
        let _ = self.child.wait();
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
        let mut buf = vec![0u8; self.width as usize * self.height as usize * 4];
        match self.stdout.read_exact(&mut buf) {
            Ok(()) => Ok(RgbaImage::from_raw(self.width, self.height, buf)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(PanelError::file_error(&self.path, e)),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.stop_child();
        let (child, stdout) = spawn_ffmpeg(&self.path, self.width, self.height)?;
        self.child = child;
        self.stdout = stdout;
        Ok(())
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        self.stop_child();
    }
}

fn spawn_ffmpeg(path: &Path, width: u32, height: u32) -> Result<(Child, ChildStdout)> {
    let mut child = Command::new("ffmpeg")
        .args(["-v", "error", "-nostdin", "-i"])
        .arg(path)
        .args(["-vf", &format!("scale={width}:{height}:flags=lanczos")])
        .args(["-f", "rawvideo", "-pix_fmt", "rgba", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| PanelError::unsupported_media(path, format!("cannot start ffmpeg: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PanelError::unsupported_media(path, "ffmpeg stdout unavailable"))?;
    Ok((child, stdout))
}

/// Frame rate from `ffprobe`, e.g. `30000/1001`.
fn probe_fps(path: &Path) -> Option<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=r_frame_rate",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .map_err(|e| warn!(error = %e, "ffprobe unavailable, assuming default frame rate"))
        .ok()?;
    parse_rate(String::from_utf8_lossy(&output.stdout).trim())
}

fn parse_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => num.trim().parse::<f64>().ok()? / den.trim().parse::<f64>().ok()?,
        None => rate.parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(is_video_file(Path::new("/media/clip.MP4")));
        assert!(is_video_file(Path::new("loop.webm")));
        assert!(!is_video_file(Path::new("clip.gif")));
        assert!(!is_video_file(Path::new("noext")));
    }

    #[test]
    fn frame_rate_parsing() {
        assert_eq!(parse_rate("30/1"), Some(30.0));
        assert_eq!(parse_rate("25"), Some(25.0));
        assert!((parse_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate(""), None);
    }
}
