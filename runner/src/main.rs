mod replay;

use element_detector::snapshot::{JpegDirSink, SnapshotSink};
use element_detector::{Detector, DetectorError};
use element_detector_common::config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        camera = config.camera.name,
        width = config.camera.width,
        height = config.camera.height,
        left = config.detector.left,
        right = config.detector.right,
        threshold = config.detector.threshold,
        replay_dir = %config.replay.dir.display(),
        "starting element detector"
    );

    let manager = Arc::new(replay::ReplayManager::new(&config.replay));
    let mut detector = match Detector::start(
        manager,
        config.camera.clone(),
        config.detector.clone(),
    )
    .await
    {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "invalid detector configuration");
            std::process::exit(1);
        }
    };

    if config.snapshots.enabled {
        match JpegDirSink::new(&config.snapshots.dir, config.snapshots.quality) {
            Ok(sink) => {
                let sink: Box<dyn SnapshotSink> = Box::new(sink);
                detector = detector.with_snapshots(sink);
            }
            Err(e) => warn!(error = %e, "snapshots disabled"),
        }
    }

    info!(state = %detector.state(), "entering control loop");
    let poll_every = Duration::from_millis(config.replay.poll_interval_ms.max(1));
    run_control_loop(&mut detector, poll_every).await;

    detector.shut_down();
    let stats = detector.stats();
    info!(
        classified = stats.classified,
        evicted = stats.evicted,
        last_position = %detector.element_position(),
        "element detector stopped"
    );
}

async fn run_control_loop(detector: &mut Detector, poll_every: Duration) {
    let mut ticker = tokio::time::interval(poll_every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last = detector.element_position();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            _ = ticker.tick() => {}
        }

        match detector.load_image() {
            Ok(Some(position)) => {
                if position != last {
                    info!(%position, previous = %last, "element position changed");
                    last = position;
                }
                let classified = detector.stats().classified;
                if classified % 100 == 0 {
                    let stats = detector.stats();
                    debug!(classified, evicted = stats.evicted, "frames classified");
                }
            }
            Ok(None) => {}
            Err(DetectorError::ShutDown) => break,
            Err(e) => {
                error!(error = %e, "failed to load frame");
                break;
            }
        }
    }
}
