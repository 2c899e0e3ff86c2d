use element_detector_common::config::{CameraConfig, ConfigError, DetectorConfig};
use element_detector_common::frame::{ElementPosition, Frame};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::{BoundedFrameBuffer, BufferError};
use crate::camera::{
    Camera, CameraError, CameraManager, CaptureRequest, CaptureSession, ConfigureCallback,
    FrameSink, SequenceCompleteHook,
};
use crate::classify::{Classifier, RandomTieBreak, TieBreak};
use crate::handshake::{CancelToken, HandshakeError, SessionHandshake};
use crate::session::{SessionEvent, SessionState};
use crate::snapshot::SnapshotSink;

#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("waiting for capture session: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("camera delivered no capture session")]
    Unconfigured,
    #[error("cannot initialize while the session is {0}; shut down first")]
    InvalidState(SessionState),
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("detector was shut down; initialize it again before loading frames")]
    ShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DetectorStats {
    /// Frames taken from the buffer and classified.
    pub classified: u64,
    /// Frames the buffer threw away unclassified.
    pub evicted: u64,
    /// Frames waiting in the buffer right now.
    pub buffered: usize,
}

/// Pull-based element detector over a live camera.
///
/// The camera's delivery thread pushes frames into a small drop-oldest
/// buffer; [`load_image`](Self::load_image) classifies the newest-surviving
/// frame on the caller's thread, and [`element_position`](Self::element_position)
/// reports the last classification. Neither call ever waits on the camera.
pub struct Detector {
    manager: Arc<dyn CameraManager>,
    camera_config: CameraConfig,
    classifier: Classifier,
    buffer: Arc<BoundedFrameBuffer<Frame>>,
    camera: Option<Box<dyn Camera>>,
    session: Option<Box<dyn CaptureSession>>,
    state: SessionState,
    shut_down: bool,
    position: watch::Sender<ElementPosition>,
    tie: Box<dyn TieBreak>,
    snapshots: Option<Box<dyn SnapshotSink>>,
    cancel: CancelToken,
    classified: u64,
}

impl Detector {
    /// Build a detector without touching the camera yet.
    ///
    /// The crop is checked against the configured camera resolution here, so
    /// bad bounds surface before any frame is captured.
    pub fn new(
        manager: Arc<dyn CameraManager>,
        camera_config: CameraConfig,
        detector_config: DetectorConfig,
    ) -> Result<Self, ConfigError> {
        detector_config.validate(camera_config.width, camera_config.height)?;
        let buffer = BoundedFrameBuffer::with_release(
            detector_config.buffer_capacity,
            Box::new(|frame: Frame| trace!(seq = frame.seq, "stale frame released")),
        );
        let (position, _) = watch::channel(ElementPosition::None);
        Ok(Self {
            manager,
            camera_config,
            classifier: Classifier::from_config(&detector_config),
            buffer: Arc::new(buffer),
            camera: None,
            session: None,
            state: SessionState::Closed,
            shut_down: false,
            position,
            tie: Box::new(RandomTieBreak::from_entropy()),
            snapshots: None,
            cancel: CancelToken::new(),
            classified: 0,
        })
    }

    /// Default camera settings, crop columns `[left, right)`.
    pub fn with_bounds(
        manager: Arc<dyn CameraManager>,
        left: u32,
        right: u32,
    ) -> Result<Self, ConfigError> {
        Self::new(
            manager,
            CameraConfig::default(),
            DetectorConfig::with_bounds(left, right),
        )
    }

    /// Build and initialize in one go. Acquisition failures are logged and
    /// leave the detector in [`SessionState::Failed`]; only configuration
    /// errors are returned.
    pub async fn start(
        manager: Arc<dyn CameraManager>,
        camera_config: CameraConfig,
        detector_config: DetectorConfig,
    ) -> Result<Self, ConfigError> {
        let mut detector = Self::new(manager, camera_config, detector_config)?;
        if let Err(e) = detector.initialize().await {
            warn!(error = %e, "detector started without a camera session");
        }
        Ok(detector)
    }

    pub fn with_tie_break(mut self, tie: Box<dyn TieBreak>) -> Self {
        self.tie = tie;
        self
    }

    pub fn with_snapshots(mut self, sink: Box<dyn SnapshotSink>) -> Self {
        self.snapshots = Some(sink);
        self
    }

    /// Open the camera and establish a streaming capture session.
    ///
    /// Suspends until the camera reports the session configured, the
    /// configure deadline passes, or the [`cancel_token`](Self::cancel_token)
    /// is raised. On any failure the detector stays usable in
    /// [`SessionState::Failed`] and simply never receives frames; call
    /// [`shut_down`](Self::shut_down) before trying again.
    pub async fn initialize(&mut self) -> Result<(), AcquireError> {
        if self.state != SessionState::Closed {
            warn!(state = %self.state, "initialize called on an open session; ignoring");
            return Err(AcquireError::InvalidState(self.state));
        }
        self.advance(SessionEvent::OpenRequested);
        self.shut_down = false;

        match self.establish().await {
            Ok(()) => {
                self.buffer.reopen();
                self.advance(SessionEvent::Configured);
                info!(camera = self.camera_config.name, "capture session active");
                Ok(())
            }
            Err(e) => {
                // Frames already offered by a half-started session are dropped,
                // and a failed detector never classifies anything.
                self.buffer.drain();
                self.advance(SessionEvent::Error);
                error!(camera = self.camera_config.name, error = %e, "failed to establish capture session");
                Err(e)
            }
        }
    }

    async fn establish(&mut self) -> Result<(), AcquireError> {
        let cancel = self.cancel.clone();
        if cancel.is_cancelled() {
            return Err(HandshakeError::Cancelled.into());
        }

        let name = self.camera_config.name.clone();
        let deadline = self.camera_config.open_timeout();
        let manager = Arc::clone(&self.manager);
        let opened = tokio::task::spawn_blocking(move || manager.open(&name, deadline))
            .await
            .map_err(|e| CameraError::Open {
                name: self.camera_config.name.clone(),
                reason: e.to_string(),
            })??;
        self.advance(SessionEvent::Opened);
        let camera = self.camera.insert(opened);

        let format = self.camera_config.format;
        if !camera.supports_format(format) {
            return Err(CameraError::UnsupportedFormat(format).into());
        }
        let (width, height) = (self.camera_config.width, self.camera_config.height);
        let fps = self
            .camera_config
            .fps
            .or_else(|| camera.max_fps(format, width, height))
            .ok_or_else(|| {
                CameraError::Configure(format!("no frame rate available for {width}x{height}"))
            })?;
        let request = CaptureRequest {
            format,
            width,
            height,
            fps,
        };
        info!(camera = self.camera_config.name, %request, "configuring capture session");

        let (handshake, completer) = SessionHandshake::<Option<Box<dyn CaptureSession>>>::new();
        let buffer = Arc::clone(&self.buffer);
        let on_configured: ConfigureCallback = Box::new(move |result| {
            let delivered = match result {
                Ok(mut session) => {
                    let on_frame: FrameSink = Box::new(move |frame| buffer.offer(frame));
                    let on_complete: SequenceCompleteHook = Box::new(|done| {
                        info!(
                            sequence_id = done.sequence_id,
                            last_frame = ?done.last_frame,
                            "capture sequence completed"
                        )
                    });
                    match session.start_capture(request, on_frame, on_complete) {
                        Ok(()) => Some(session),
                        Err(e) => {
                            error!(error = %e, "failed to start capture");
                            session.close();
                            None
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "camera rejected capture session");
                    None
                }
            };
            if let Err(rejected) = completer.finish(delivered) {
                if let Some(mut session) = rejected.into_inner() {
                    warn!("capture session arrived after the caller gave up; closing it");
                    session.stop_capture();
                    session.close();
                }
            }
        });
        camera.create_capture_session(on_configured)?;

        let session = match handshake
            .wait_or_reclaim(self.camera_config.configure_timeout(), &cancel)
            .await
        {
            Ok(session) => session.ok_or(AcquireError::Unconfigured)?,
            Err((e, stranded)) => {
                if let Some(Some(mut session)) = stranded {
                    warn!(error = %e, "capture session arrived as the wait ended; closing it");
                    session.stop_capture();
                    session.close();
                }
                return Err(e.into());
            }
        };
        self.session = Some(session);
        Ok(())
    }

    /// Classify the oldest buffered frame, if any.
    ///
    /// Returns the new position, or `Ok(None)` when no frame was waiting (the
    /// previous position is kept). A detector whose `initialize` failed has
    /// a closed buffer and always returns `Ok(None)`. Never blocks.
    pub fn load_image(&mut self) -> Result<Option<ElementPosition>, DetectorError> {
        if self.shut_down {
            return Err(DetectorError::ShutDown);
        }
        let frame = match self.buffer.poll() {
            Ok(Some(frame)) => frame,
            Ok(None) | Err(BufferError::Closed) => return Ok(None),
        };

        let result = match self.classifier.classify(&frame, self.tie.as_mut()) {
            Ok(result) => result,
            Err(e) => {
                warn!(seq = frame.seq, error = %e, "frame does not fit the crop, skipping");
                return Ok(None);
            }
        };
        // Pixels are no longer needed once the crop is taken.
        drop(frame);

        if let Some(sink) = &self.snapshots {
            if let Err(e) = sink.persist(&result.crop) {
                warn!(error = %e, "failed to save diagnostic snapshot");
            }
        }

        self.classified += 1;
        self.position.send_replace(result.position);
        Ok(Some(result.position))
    }

    /// Last classified position; `None` until the first frame is classified.
    pub fn element_position(&self) -> ElementPosition {
        *self.position.borrow()
    }

    /// Watch the last classified position from another thread or task.
    pub fn subscribe(&self) -> watch::Receiver<ElementPosition> {
        self.position.subscribe()
    }

    /// Token that aborts an in-flight [`initialize`](Self::initialize).
    /// It stays raised afterwards; `reset` it before retrying.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            classified: self.classified,
            evicted: self.buffer.evicted(),
            buffered: self.buffer.len(),
        }
    }

    /// Stop capture, close the camera and drop buffered frames.
    /// Safe to call any number of times.
    pub fn shut_down(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stop_capture();
            session.close();
        }
        if let Some(mut camera) = self.camera.take() {
            camera.close();
        }
        let released = self.buffer.drain();
        if self.state != SessionState::Closed {
            info!(from = %self.state, released, "detector shut down");
        }
        self.advance(SessionEvent::ShutDown);
        self.shut_down = true;
    }

    fn advance(&mut self, event: SessionEvent) {
        match self.state.next(event) {
            Ok(next) => {
                if next != self.state {
                    debug!(from = %self.state, to = %next, "session transition");
                }
                self.state = next;
            }
            Err(e) => warn!(error = %e, "ignoring session event"),
        }
    }
}

impl Drop for Detector {
    fn drop(&mut self) {
        if self.session.is_some() || self.camera.is_some() {
            self.shut_down();
        }
    }
}
