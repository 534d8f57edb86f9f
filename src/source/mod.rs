//! Background frame sources.
//!
//! [`FrameSourceManager`] owns exactly one ready-to-render [`FrameSource`] selected by the
//! display configuration's background type. Construction fails if the source cannot be
//! loaded; there is no fallback to a different source type.
//!
//! When the manager was built from a configuration file it watches that file's
//! modification time and rebuilds the whole source, plus the display configuration, when
//! the timestamp moves forward.

pub mod video;

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use image::codecs::gif::GifDecoder;
use image::imageops::{self, FilterType};
use image::{AnimationDecoder, RgbaImage};
use tracing::{debug, error, info, warn};

use crate::config::{self, BackgroundType, DisplayConfig, ServiceConfig};
use crate::{PanelError, Result};

pub use video::{VideoDecoder, VideoOpener};

/// Image file extensions picked up by an image collection (lowercase).
pub const COLLECTION_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "webp"];

const STILL_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_GIF_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_VIDEO_FPS: f64 = 30.0;

/// The active background.
pub enum FrameSource {
    StaticImage(RgbaImage),
    AnimatedSequence { frames: Vec<RgbaImage>, frame_duration: Duration },
    VideoStream { decoder: Box<dyn VideoDecoder>, frame_interval: Duration, current: RgbaImage },
    ImageCollection { files: Vec<PathBuf>, interval: Duration },
}

impl FrameSource {
    /// How long each frame stays on screen.
    pub fn frame_duration(&self) -> Duration {
        match self {
            FrameSource::StaticImage(_) => STILL_DURATION,
            FrameSource::AnimatedSequence { frame_duration, .. } => *frame_duration,
            FrameSource::VideoStream { frame_interval, .. } => *frame_interval,
            FrameSource::ImageCollection { interval, .. } => *interval,
        }
    }

    fn len(&self) -> usize {
        match self {
            FrameSource::AnimatedSequence { frames, .. } => frames.len(),
            FrameSource::ImageCollection { files, .. } => files.len(),
            FrameSource::StaticImage(_) | FrameSource::VideoStream { .. } => 1,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            FrameSource::StaticImage(_) => "image",
            FrameSource::AnimatedSequence { .. } => "gif",
            FrameSource::VideoStream { .. } => "video",
            FrameSource::ImageCollection { .. } => "image_collection",
        }
    }
}

impl std::fmt::Debug for FrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSource")
            .field("kind", &self.kind())
            .field("frames", &self.len())
            .field("frame_duration", &self.frame_duration())
            .finish()
    }
}

/// Loads a [`FrameSource`] for the given output size.
pub fn load_source(
    display: &DisplayConfig,
    width: u32,
    height: u32,
    open_video: VideoOpener,
) -> Result<FrameSource> {
    let path = &display.background.path;
    let source = match display.background.kind {
        BackgroundType::Image => FrameSource::StaticImage(load_still(path, width, height)?),
        BackgroundType::Gif => load_gif(path, width, height)?,
        BackgroundType::Video => load_video(path, width, height, open_video)?,
        BackgroundType::ImageCollection => load_collection(path)?,
    };
    info!(
        kind = source.kind(),
        path = %path.display(),
        frames = source.len(),
        frame_duration = ?source.frame_duration(),
        "Background loaded"
    );
    Ok(source)
}

fn require_exists(path: &Path) -> Result<()> {
    fs::metadata(path).map(|_| ()).map_err(|e| PanelError::file_error(path, e))
}

/// Decode an image, resize it with Lanczos3 and convert to RGBA.
pub fn load_still(path: &Path, width: u32, height: u32) -> Result<RgbaImage> {
    require_exists(path)?;
    let image = image::open(path)
        .map_err(|e| PanelError::image(format!("decoding {}", path.display()), e))?;
    Ok(image.resize_exact(width, height, FilterType::Lanczos3).to_rgba8())
}

fn load_gif(path: &Path, width: u32, height: u32) -> Result<FrameSource> {
    let file = File::open(path).map_err(|e| PanelError::file_error(path, e))?;
    let decoder = GifDecoder::new(BufReader::new(file))
        .map_err(|e| PanelError::image(format!("decoding {}", path.display()), e))?;
    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| PanelError::image(format!("decoding frames of {}", path.display()), e))?;

    let frame_duration = frames
        .first()
        .map(|frame| {
            let (numer, denom) = frame.delay().numer_denom_ms();
            if numer == 0 || denom == 0 {
                DEFAULT_GIF_DELAY
            } else {
                Duration::from_secs_f64(numer as f64 / denom as f64 / 1000.0)
            }
        })
        .unwrap_or(DEFAULT_GIF_DELAY);

    let frames: Vec<RgbaImage> = frames
        .into_iter()
        .map(|frame| imageops::resize(frame.buffer(), width, height, FilterType::Lanczos3))
        .collect();
    if frames.is_empty() {
        return Err(PanelError::unsupported_media(path, "GIF contains no frames"));
    }
    Ok(FrameSource::AnimatedSequence { frames, frame_duration })
}

fn load_video(path: &Path, width: u32, height: u32, open_video: VideoOpener) -> Result<FrameSource> {
    require_exists(path)?;
    if !video::is_video_file(path) {
        return Err(PanelError::unsupported_media(
            path,
            format!("expected one of: {}", video::VIDEO_EXTENSIONS.join(", ")),
        ));
    }

    let mut decoder = open_video(path, width, height)?;
    let first = decoder
        .next_frame()?
        .ok_or_else(|| PanelError::unsupported_media(path, "no frames could be decoded"))?;
    let fps = decoder.fps().filter(|fps| *fps > 0.0).unwrap_or(DEFAULT_VIDEO_FPS);
    Ok(FrameSource::VideoStream {
        decoder,
        frame_interval: Duration::from_secs_f64(1.0 / fps),
        current: first,
    })
}

/// Next frame of a looping video. End of stream and read errors both rewind once.
fn next_video_frame(decoder: &mut dyn VideoDecoder, path: &Path) -> Result<RgbaImage> {
    match decoder.next_frame() {
        Ok(Some(frame)) => return Ok(frame),
        Ok(None) => debug!("End of video, rewinding"),
        Err(e) => warn!(error = %e, "Video read failed, rewinding"),
    }
    decoder.rewind()?;
    decoder
        .next_frame()?
        .ok_or_else(|| PanelError::unsupported_media(path, "no frames could be decoded"))
}

fn load_collection(dir: &Path) -> Result<FrameSource> {
    let entries = fs::read_dir(dir).map_err(|e| PanelError::file_error(dir, e))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_collection_extension(path))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(PanelError::unsupported_media(dir, "no images found in directory"));
    }
    Ok(FrameSource::ImageCollection { files, interval: STILL_DURATION })
}

fn has_collection_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| COLLECTION_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Owns the active [`FrameSource`] and the display configuration it was built from.
pub struct FrameSourceManager {
    config_path: Option<PathBuf>,
    last_modified: Option<SystemTime>,
    display: DisplayConfig,
    width: u32,
    height: u32,
    source: FrameSource,
    index: usize,
    last_switch: Instant,
    builds: u64,
    open_video: VideoOpener,
}

impl FrameSourceManager {
    /// Build from a display configuration that is never reloaded.
    pub fn new(display: DisplayConfig, width: u32, height: u32) -> Result<Self> {
        Self::build(None, display, width, height, video::open_ffmpeg)
    }

    /// Build from a configuration file, reloading it when its modification time advances.
    pub fn from_config_file(path: impl Into<PathBuf>, width: u32, height: u32) -> Result<Self> {
        Self::from_config_file_with(path, width, height, video::open_ffmpeg)
    }

    /// Like [`from_config_file`](Self::from_config_file) with a custom video decoder.
    pub fn from_config_file_with(
        path: impl Into<PathBuf>,
        width: u32,
        height: u32,
        open_video: VideoOpener,
    ) -> Result<Self> {
        let path = path.into();
        let display = ServiceConfig::load(&path)?.display;
        Self::build(Some(path), display, width, height, open_video)
    }

    /// Build from a display configuration with a custom video decoder.
    pub fn with_video_opener(
        display: DisplayConfig,
        width: u32,
        height: u32,
        open_video: VideoOpener,
    ) -> Result<Self> {
        Self::build(None, display, width, height, open_video)
    }

    fn build(
        config_path: Option<PathBuf>,
        display: DisplayConfig,
        width: u32,
        height: u32,
        open_video: VideoOpener,
    ) -> Result<Self> {
        let last_modified = match &config_path {
            Some(path) => Some(config::modified_time(path)?),
            None => None,
        };
        let source = load_source(&display, width, height, open_video)?;
        Ok(Self {
            config_path,
            last_modified,
            display,
            width,
            height,
            source,
            index: 0,
            last_switch: Instant::now(),
            builds: 1,
            open_video,
        })
    }

    pub fn display(&self) -> &DisplayConfig {
        &self.display
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    /// Index of the frame currently on screen.
    pub fn current_index(&self) -> usize {
        self.index
    }

    /// On-screen duration of the current frame.
    pub fn frame_duration(&self) -> Duration {
        self.source.frame_duration()
    }

    /// Number of times the source has been built, including the initial build.
    pub fn builds(&self) -> u64 {
        self.builds
    }

    /// Rebuild everything if the configuration file's modification time moved forward.
    ///
    /// Returns `true` when a new source was installed. A failed rebuild keeps the previous
    /// source and is retried only after the file changes again.
    pub fn reload_if_changed(&mut self) -> bool {
        let Some(path) = self.config_path.clone() else {
            return false;
        };
        let modified = match config::modified_time(&path) {
            Ok(modified) => modified,
            Err(e) => {
                warn!(error = %e, "Cannot stat configuration file");
                return false;
            }
        };
        if self.last_modified.is_some_and(|last| modified <= last) {
            return false;
        }
        self.last_modified = Some(modified);

        info!(path = %path.display(), "Configuration changed, rebuilding frame source");
        let rebuilt = ServiceConfig::load(&path).and_then(|config| {
            let source = load_source(&config.display, self.width, self.height, self.open_video)?;
            Ok((config.display, source))
        });
        match rebuilt {
            Ok((display, source)) => {
                self.display = display;
                self.source = source;
                self.index = 0;
                self.last_switch = Instant::now();
                self.builds += 1;
                true
            }
            Err(e) => {
                error!(error = %e, "Reload failed, keeping previous frame source");
                false
            }
        }
    }

    /// Current background raster, advancing the frame when its duration has elapsed.
    pub fn get_current_frame(&mut self) -> Result<RgbaImage> {
        self.get_current_frame_at(Instant::now())
    }

    /// [`get_current_frame`](Self::get_current_frame) against an explicit clock.
    pub fn get_current_frame_at(&mut self, now: Instant) -> Result<RgbaImage> {
        let due = now.saturating_duration_since(self.last_switch) >= self.source.frame_duration();

        match &mut self.source {
            FrameSource::StaticImage(image) => Ok(image.clone()),
            FrameSource::AnimatedSequence { frames, .. } => {
                if due {
                    self.index = (self.index + 1) % frames.len();
                    self.last_switch = now;
                }
                Ok(frames[self.index].clone())
            }
            FrameSource::ImageCollection { files, .. } => {
                if due {
                    self.index = (self.index + 1) % files.len();
                    self.last_switch = now;
                }
                let path = &files[self.index];
                debug!(index = self.index, path = %path.display(), "Decoding collection image");
                load_still(path, self.width, self.height)
            }
            FrameSource::VideoStream { decoder, current, .. } => {
                if due {
                    *current = next_video_frame(decoder.as_mut(), &self.display.background.path)?;
                    self.index += 1;
                    self.last_switch = now;
                }
                Ok(current.clone())
            }
        }
    }
}

impl std::fmt::Debug for FrameSourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSourceManager")
            .field("config_path", &self.config_path)
            .field("source", &self.source)
            .field("index", &self.index)
            .field("builds", &self.builds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::write_png;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, Rgba};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn write_gif(path: &Path, colors: &[[u8; 4]], delay_ms: Option<u32>) {
        let file = File::create(path).unwrap();
        let mut encoder = GifEncoder::new(file);
        for color in colors {
            let image = RgbaImage::from_pixel(8, 8, Rgba(*color));
            let frame = match delay_ms {
                Some(ms) => Frame::from_parts(image, 0, 0, Delay::from_numer_denom_ms(ms, 1)),
                None => Frame::new(image),
            };
            encoder.encode_frame(frame).unwrap();
        }
    }

    #[test]
    fn static_image_is_resized_and_fixed_at_one_second() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bg.png");
        write_png(&path, 10, 5, [255, 0, 0, 255]);

        let mut manager =
            FrameSourceManager::new(DisplayConfig::background_only(BackgroundType::Image, &path), 32, 24)
                .unwrap();
        assert_eq!(manager.frame_duration(), Duration::from_secs(1));

        let frame = manager.get_current_frame_at(Instant::now() + Duration::from_secs(5)).unwrap();
        assert_eq!(frame.dimensions(), (32, 24));
        assert_eq!(frame.get_pixel(16, 12), &Rgba([255, 0, 0, 255]));
        assert_eq!(manager.frame_duration(), Duration::from_secs(1));
    }

    #[test]
    fn gif_without_delay_defaults_to_100ms() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anim.gif");
        write_gif(&path, &[[255, 0, 0, 255], [0, 0, 255, 255]], None);

        let manager =
            FrameSourceManager::new(DisplayConfig::background_only(BackgroundType::Gif, &path), 16, 16)
                .unwrap();
        assert_eq!(manager.frame_duration(), Duration::from_millis(100));
    }

    #[test]
    fn gif_frames_advance_with_declared_delay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anim.gif");
        write_gif(&path, &[[255, 0, 0, 255], [0, 0, 255, 255]], Some(250));

        let mut manager =
            FrameSourceManager::new(DisplayConfig::background_only(BackgroundType::Gif, &path), 16, 16)
                .unwrap();
        assert_eq!(manager.frame_duration(), Duration::from_millis(250));

        let start = Instant::now();
        let first = manager.get_current_frame_at(start).unwrap();
        assert_eq!(manager.current_index(), 0);
        assert!(first.get_pixel(8, 8)[0] > 200);

        let second = manager.get_current_frame_at(start + Duration::from_millis(300)).unwrap();
        assert_eq!(manager.current_index(), 1);
        assert!(second.get_pixel(8, 8)[2] > 200);

        manager.get_current_frame_at(start + Duration::from_millis(400)).unwrap();
        assert_eq!(manager.current_index(), 1, "not due yet");
        manager.get_current_frame_at(start + Duration::from_millis(600)).unwrap();
        assert_eq!(manager.current_index(), 0, "wraps around");
    }

    #[test]
    fn collection_is_sorted_filtered_and_lazy() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("b.PNG"), 4, 4, [0, 255, 0, 255]);
        write_png(&dir.path().join("a.png"), 4, 4, [255, 0, 0, 255]);
        fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let mut manager = FrameSourceManager::new(
            DisplayConfig::background_only(BackgroundType::ImageCollection, dir.path()),
            8,
            8,
        )
        .unwrap();
        match manager.source() {
            FrameSource::ImageCollection { files, .. } => {
                let names: Vec<String> =
                    files.iter().map(|f| f.file_name().unwrap().to_string_lossy().into_owned()).collect();
                assert_eq!(names, ["a.png", "b.PNG"]);
            }
            other => panic!("unexpected source {other:?}"),
        }

        let start = Instant::now();
        assert_eq!(manager.get_current_frame_at(start).unwrap().get_pixel(0, 0), &Rgba([255, 0, 0, 255]));

        // Decoded from disk on every call.
        write_png(&dir.path().join("b.PNG"), 4, 4, [0, 0, 255, 255]);
        let next = manager.get_current_frame_at(start + Duration::from_secs(2)).unwrap();
        assert_eq!(next.get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn load_failures_are_fatal() {
        let dir = tempfile::tempdir().unwrap();

        let missing = DisplayConfig::background_only(BackgroundType::Image, dir.path().join("nope.png"));
        assert!(matches!(FrameSourceManager::new(missing, 8, 8), Err(PanelError::File { .. })));

        let empty = DisplayConfig::background_only(BackgroundType::ImageCollection, dir.path());
        assert!(matches!(
            FrameSourceManager::new(empty, 8, 8),
            Err(PanelError::UnsupportedMediaFormat { .. })
        ));

        let clip = dir.path().join("clip.xyz");
        fs::write(&clip, b"data").unwrap();
        let video = DisplayConfig::background_only(BackgroundType::Video, &clip);
        assert!(matches!(
            FrameSourceManager::with_video_opener(video, 8, 8, |_, _, _| unreachable!()),
            Err(PanelError::UnsupportedMediaFormat { .. })
        ));
    }

    static DECODED: AtomicUsize = AtomicUsize::new(0);

    /// Two-frame clip with no declared frame rate.
    struct TwoFrames {
        position: usize,
    }

    impl VideoDecoder for TwoFrames {
        fn fps(&self) -> Option<f64> {
            None
        }

        fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
            if self.position >= 2 {
                return Ok(None);
            }
            self.position += 1;
            DECODED.fetch_add(1, Ordering::SeqCst);
            Ok(Some(RgbaImage::from_pixel(4, 4, Rgba([self.position as u8, 0, 0, 255]))))
        }

        fn rewind(&mut self) -> Result<()> {
            self.position = 0;
            Ok(())
        }
    }

    fn two_frames(_: &Path, _: u32, _: u32) -> Result<Box<dyn VideoDecoder>> {
        Ok(Box::new(TwoFrames { position: 0 }))
    }

    #[test]
    fn video_defaults_to_30fps_and_loops() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.MKV");
        fs::write(&clip, b"data").unwrap();

        let mut manager = FrameSourceManager::with_video_opener(
            DisplayConfig::background_only(BackgroundType::Video, &clip),
            4,
            4,
            two_frames,
        )
        .unwrap();
        assert_eq!(manager.frame_duration(), Duration::from_secs_f64(1.0 / 30.0));

        let start = manager.last_switch;
        let step = Duration::from_millis(50);
        let reds: Vec<u8> = (0..4)
            .map(|i| manager.get_current_frame_at(start + step * i).unwrap().get_pixel(0, 0)[0])
            .collect();
        assert_eq!(reds, vec![1, 2, 1, 2]);

        // A second call inside the frame interval reuses the decoded frame.
        let before = DECODED.load(Ordering::SeqCst);
        manager.get_current_frame_at(start + step * 3).unwrap();
        assert_eq!(DECODED.load(Ordering::SeqCst), before);
    }

    /// Clip whose reads fail after the first frame; each rewind yields a brighter first frame.
    struct CorruptTail {
        position: usize,
        rewinds: u8,
    }

    impl VideoDecoder for CorruptTail {
        fn fps(&self) -> Option<f64> {
            Some(10.0)
        }

        fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
            self.position += 1;
            if self.position > 1 {
                return Err(PanelError::unsupported_media("clip.mp4", "corrupt packet"));
            }
            Ok(Some(RgbaImage::from_pixel(4, 4, Rgba([10 + self.rewinds, 0, 0, 255]))))
        }

        fn rewind(&mut self) -> Result<()> {
            self.position = 0;
            self.rewinds += 1;
            Ok(())
        }
    }

    /// Opens, but never produces a frame.
    struct Undecodable;

    impl VideoDecoder for Undecodable {
        fn fps(&self) -> Option<f64> {
            Some(25.0)
        }

        fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
            Ok(None)
        }

        fn rewind(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn open_undecodable(_: &Path, _: u32, _: u32) -> Result<Box<dyn VideoDecoder>> {
        Ok(Box::new(Undecodable))
    }

    fn open_corrupt_tail(_: &Path, _: u32, _: u32) -> Result<Box<dyn VideoDecoder>> {
        Ok(Box::new(CorruptTail { position: 0, rewinds: 0 }))
    }

    fn no_ffmpeg(path: &Path, _: u32, _: u32) -> Result<Box<dyn VideoDecoder>> {
        Err(PanelError::unsupported_media(path, "cannot start ffmpeg"))
    }

    fn video_file(dir: &Path) -> DisplayConfig {
        let clip = dir.join("clip.mp4");
        fs::write(&clip, b"data").unwrap();
        DisplayConfig::background_only(BackgroundType::Video, &clip)
    }

    #[test]
    fn undecodable_video_fails_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let result = FrameSourceManager::with_video_opener(video_file(dir.path()), 4, 4, open_undecodable);
        assert!(matches!(result, Err(PanelError::UnsupportedMediaFormat { .. })));

        let failing = FrameSourceManager::with_video_opener(video_file(dir.path()), 4, 4, no_ffmpeg);
        assert!(failing.is_err());
    }

    #[test]
    fn video_read_error_rewinds_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager =
            FrameSourceManager::with_video_opener(video_file(dir.path()), 4, 4, open_corrupt_tail).unwrap();

        let start = manager.last_switch;
        assert_eq!(manager.get_current_frame_at(start).unwrap().get_pixel(0, 0)[0], 10);

        let after_error = manager.get_current_frame_at(start + Duration::from_millis(100)).unwrap();
        assert_eq!(after_error.get_pixel(0, 0)[0], 11);
        assert_eq!(manager.current_index(), 1);
    }

    fn write_config(path: &Path, background: &Path) {
        let yaml = format!(
            "device: {{ vendor_id: 1, product_id: 2 }}\ndisplay:\n  background: {{ type: image, path: '{}' }}\n",
            background.display()
        );
        fs::write(path, yaml).unwrap();
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options().write(true).open(path).unwrap().set_modified(time).unwrap();
    }

    #[test]
    fn reloads_only_when_mtime_strictly_increases() {
        let dir = tempfile::tempdir().unwrap();
        let red = dir.path().join("red.png");
        let blue = dir.path().join("blue.png");
        write_png(&red, 4, 4, [255, 0, 0, 255]);
        write_png(&blue, 4, 4, [0, 0, 255, 255]);

        let config = dir.path().join("panel.yaml");
        write_config(&config, &red);
        let base = SystemTime::now() - Duration::from_secs(3600);
        set_mtime(&config, base);

        let mut manager = FrameSourceManager::from_config_file(&config, 4, 4).unwrap();
        assert_eq!(manager.builds(), 1);

        // Same timestamp: no rebuild even though the contents changed.
        write_config(&config, &blue);
        set_mtime(&config, base);
        assert!(!manager.reload_if_changed());

        // Older timestamp: no rebuild.
        set_mtime(&config, base - Duration::from_secs(60));
        assert!(!manager.reload_if_changed());
        assert_eq!(manager.get_current_frame().unwrap().get_pixel(0, 0), &Rgba([255, 0, 0, 255]));

        // Newer timestamp: full rebuild.
        set_mtime(&config, base + Duration::from_secs(60));
        assert!(manager.reload_if_changed());
        assert_eq!(manager.builds(), 2);
        assert_eq!(manager.get_current_frame().unwrap().get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
        assert!(!manager.reload_if_changed());
    }

    #[test]
    fn failed_reload_keeps_previous_source() {
        let dir = tempfile::tempdir().unwrap();
        let red = dir.path().join("red.png");
        write_png(&red, 4, 4, [255, 0, 0, 255]);
        let config = dir.path().join("panel.yaml");
        write_config(&config, &red);
        let base = SystemTime::now() - Duration::from_secs(3600);
        set_mtime(&config, base);

        let mut manager = FrameSourceManager::from_config_file(&config, 4, 4).unwrap();

        write_config(&config, &dir.path().join("missing.png"));
        set_mtime(&config, base + Duration::from_secs(1));
        assert!(!manager.reload_if_changed());
        assert_eq!(manager.builds(), 1);
        assert_eq!(manager.get_current_frame().unwrap().get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
    }
}
