use element_detector::camera::{
    Camera, CameraError, CameraManager, CaptureRequest, CaptureSession, ConfigureCallback,
    FrameSink, SequenceCompleteHook, SequenceCompleted,
};
use element_detector_common::config::{PixelFormat, ReplayConfig};
use element_detector_common::frame::Frame;
use image::imageops::{self, FilterType};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Camera stand-in that plays a directory of still images back as a live
/// stream, one delivery thread per capture session.
pub struct ReplayManager {
    dir: PathBuf,
    fps: f64,
    loop_playback: bool,
}

impl ReplayManager {
    pub fn new(config: &ReplayConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            fps: config.fps,
            loop_playback: config.loop_playback,
        }
    }
}

impl CameraManager for ReplayManager {
    fn open(&self, name: &str, _deadline: Duration) -> Result<Box<dyn Camera>, CameraError> {
        let files = list_images(&self.dir).map_err(|e| CameraError::Open {
            name: name.to_string(),
            reason: format!("{}: {e}", self.dir.display()),
        })?;
        if files.is_empty() {
            return Err(CameraError::Open {
                name: name.to_string(),
                reason: format!("no images in {}", self.dir.display()),
            });
        }
        info!(camera = name, dir = %self.dir.display(), images = files.len(), "replay camera opened");
        Ok(Box::new(ReplayCamera {
            files: Arc::new(files),
            fps: self.fps,
            loop_playback: self.loop_playback,
            closed: false,
        }))
    }
}

fn list_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

struct ReplayCamera {
    files: Arc<Vec<PathBuf>>,
    fps: f64,
    loop_playback: bool,
    closed: bool,
}

impl Camera for ReplayCamera {
    fn supports_format(&self, _format: PixelFormat) -> bool {
        // Stills are decoded to RGB whatever the requested wire format.
        true
    }

    fn max_fps(&self, _format: PixelFormat, _width: u32, _height: u32) -> Option<u32> {
        Some(self.fps.round().max(1.0) as u32)
    }

    fn create_capture_session(
        &mut self,
        on_configured: ConfigureCallback,
    ) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::Closed);
        }
        let session = ReplaySession {
            files: Arc::clone(&self.files),
            loop_playback: self.loop_playback,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        };
        // Configuration completes on its own thread, like a real driver.
        std::thread::spawn(move || on_configured(Ok(Box::new(session))));
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        debug!("replay camera closed");
    }
}

struct ReplaySession {
    files: Arc<Vec<PathBuf>>,
    loop_playback: bool,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureSession for ReplaySession {
    fn start_capture(
        &mut self,
        request: CaptureRequest,
        mut on_frame: FrameSink,
        on_complete: SequenceCompleteHook,
    ) -> Result<(), CameraError> {
        if self.worker.is_some() {
            return Err(CameraError::Capture("capture already started".into()));
        }
        if request.fps == 0 {
            return Err(CameraError::Capture("frame rate must be positive".into()));
        }
        let period = Duration::from_secs_f64(1.0 / f64::from(request.fps));
        let files = Arc::clone(&self.files);
        let running = Arc::clone(&self.running);
        let loop_playback = self.loop_playback;
        running.store(true, Ordering::SeqCst);

        let worker = std::thread::Builder::new()
            .name("replay-capture".into())
            .spawn(move || {
                let mut seq: u64 = 0;
                let mut last_frame = None;
                'playback: loop {
                    for path in files.iter() {
                        if !running.load(Ordering::SeqCst) {
                            break 'playback;
                        }
                        match load_frame(path, &request, seq) {
                            Ok(frame) => {
                                on_frame(frame);
                                last_frame = Some(seq);
                                seq += 1;
                            }
                            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable image"),
                        }
                        std::thread::sleep(period);
                    }
                    if !loop_playback {
                        break;
                    }
                }
                running.store(false, Ordering::SeqCst);
                on_complete(SequenceCompleted {
                    sequence_id: 0,
                    last_frame,
                });
            })
            .map_err(|e| CameraError::Capture(e.to_string()))?;
        self.worker = Some(worker);
        info!(%request, "replay capture started");
        Ok(())
    }

    fn stop_capture(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("replay capture thread panicked");
            }
        }
    }

    fn close(&mut self) {
        self.stop_capture();
    }
}

/// Decode one still and scale it to the requested resolution.
fn load_frame(path: &Path, request: &CaptureRequest, seq: u64) -> Result<Frame, image::ImageError> {
    let mut rgb = image::open(path)?.to_rgb8();
    if rgb.dimensions() != (request.width, request.height) {
        rgb = imageops::resize(&rgb, request.width, request.height, FilterType::Triangle);
    }
    Ok(Frame::now(rgb, seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::sync::Mutex;

    fn replay_dir(count: usize) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..count {
            let img = RgbImage::from_pixel(32, 24, Rgb([200, 10, 10]));
            img.save(dir.path().join(format!("frame-{i:03}.png"))).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
        dir
    }

    fn manager(dir: &Path, loop_playback: bool) -> ReplayManager {
        ReplayManager::new(&ReplayConfig {
            dir: dir.to_path_buf(),
            fps: 200.0,
            loop_playback,
            ..ReplayConfig::default()
        })
    }

    #[test]
    fn open_fails_on_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = manager(dir.path(), false)
            .open("Webcam 1", Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, CameraError::Open { .. }));
    }

    #[test]
    fn plays_every_image_once_and_reports_completion() {
        let dir = replay_dir(3);
        let mut camera = manager(dir.path(), false)
            .open("Webcam 1", Duration::from_secs(1))
            .unwrap();
        assert_eq!(camera.max_fps(PixelFormat::Yuy2, 64, 48), Some(200));

        let (tx, rx) = std::sync::mpsc::channel();
        camera
            .create_capture_session(Box::new(move |result| {
                tx.send(result.map_err(|e| e.to_string())).unwrap();
            }))
            .unwrap();
        let mut session = rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
            .unwrap();

        let frames = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let sink = Arc::clone(&frames);
        session
            .start_capture(
                CaptureRequest {
                    format: PixelFormat::Rgb,
                    width: 64,
                    height: 48,
                    fps: 200,
                },
                Box::new(move |frame| sink.lock().unwrap().push(frame)),
                Box::new(move |done| done_tx.send(done).unwrap()),
            )
            .unwrap();

        let done = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(done.last_frame, Some(2));
        session.close();

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.image.dimensions() == (64, 48)));
        assert_eq!(frames.iter().map(|f| f.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
    }
}
