use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Diagnostic storage for cropped frames, used to tune camera placement.
pub trait SnapshotSink: Send + Sync {
    /// Persist one crop. Returns where it went.
    fn persist(&self, crop: &RgbImage) -> Result<PathBuf, SnapshotError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to create snapshot directory {0}: {1}")]
    CreateDir(String, std::io::Error),
    #[error("failed to write snapshot {0}: {1}")]
    Io(String, std::io::Error),
    #[error("failed to encode snapshot {0}: {1}")]
    Encode(String, image::ImageError),
}

/// Writes crops as `webcam-frame-{n}.jpg` into one directory, `n` counting
/// up from zero for the lifetime of the sink.
pub struct JpegDirSink {
    dir: PathBuf,
    quality: u8,
    counter: AtomicU64,
}

impl JpegDirSink {
    /// Create `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>, quality: u8) -> Result<Self, SnapshotError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| SnapshotError::CreateDir(dir.display().to_string(), e))?;
        info!(dir = %dir.display(), quality, "snapshot directory ready");
        Ok(Self {
            dir,
            quality: quality.clamp(1, 100),
            counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SnapshotSink for JpegDirSink {
    fn persist(&self, crop: &RgbImage) -> Result<PathBuf, SnapshotError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!("webcam-frame-{n}.jpg"));
        let file = File::create(&path)
            .map_err(|e| SnapshotError::Io(path.display().to_string(), e))?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.quality)
            .encode_image(crop)
            .map_err(|e| SnapshotError::Encode(path.display().to_string(), e))?;
        // Small crops sit entirely in the buffer until here.
        writer
            .flush()
            .map_err(|e| SnapshotError::Io(path.display().to_string(), e))?;
        debug!(path = %path.display(), "snapshot written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn writes_numbered_jpegs() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = JpegDirSink::new(tmp.path().join("captures"), 100).unwrap();
        let crop = RgbImage::from_pixel(16, 8, Rgb([200, 30, 30]));

        let first = sink.persist(&crop).unwrap();
        let second = sink.persist(&crop).unwrap();

        assert_eq!(first.file_name().unwrap(), "webcam-frame-0.jpg");
        assert_eq!(second.file_name().unwrap(), "webcam-frame-1.jpg");
        let bytes = std::fs::read(&first).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = JpegDirSink::new(tmp.path().join("gone"), 90).unwrap();
        std::fs::remove_dir(sink.dir()).unwrap();

        let err = sink.persist(&RgbImage::new(4, 4)).unwrap_err();
        assert!(matches!(err, SnapshotError::Io(..)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_write_is_reported_not_swallowed() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let sink = JpegDirSink::new(tmp.path(), 100).unwrap();
        std::os::unix::fs::symlink(full, sink.dir().join("webcam-frame-0.jpg")).unwrap();

        let err = sink.persist(&RgbImage::new(4, 4)).unwrap_err();
        assert!(matches!(err, SnapshotError::Io(..)), "got {err:?}");
    }
}
