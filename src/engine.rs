//! Per-request decision workflow.
//!
//! ```text
//! lookup camera -> debounce check -> snapshot -> detection -> filter
//!     -> match: record debounce, notify, persist evidence
//! ```
//!
//! Every failure is scoped to the request and reported in the [`Outcome`].
//! The debounce time is only recorded for a matched event; snapshot and
//! detection failures leave it untouched.

use std::fmt;
use std::time::Instant;

use crate::config::{CameraPolicy, CameraRegistry, Settings};
use crate::debounce::{now_s, DebounceStore};
use crate::detect::{ObjectDetector, Prediction};
use crate::error::{DetectionError, RetrievalError};
use crate::evidence::EvidenceWriter;
use crate::filter;
use crate::notify::Notifier;
use crate::session::SnapshotSource;

/// User-visible result of one trigger request.
#[derive(Debug)]
pub enum Outcome {
    NotConfigured {
        camera_id: String,
    },
    Skipped {
        camera_id: String,
        seconds_ago: u64,
        interval_s: u64,
    },
    SnapshotFailed {
        camera_id: String,
        error: RetrievalError,
    },
    DetectionFailed {
        camera_id: String,
        error: DetectionError,
    },
    NoMatch {
        camera_id: String,
        camera_name: String,
        elapsed_s: f64,
    },
    Matched {
        camera_id: String,
        camera_name: String,
        prediction: Prediction,
        elapsed_s: f64,
    },
}

impl Outcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Outcome::Matched { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::NotConfigured { camera_id } => {
                write!(f, "Configuration for camera {} not found", camera_id)
            }
            Outcome::Skipped {
                camera_id,
                seconds_ago,
                interval_s,
            } => write!(
                f,
                "Camera {}: skipping detection as it was triggered {}s ago (interval {}s)",
                camera_id, seconds_ago, interval_s
            ),
            Outcome::SnapshotFailed { camera_id, error } => {
                write!(f, "Camera {}: failed to get snapshot: {}", camera_id, error)
            }
            Outcome::DetectionFailed { camera_id, error } => write!(
                f,
                "Camera {}: error calling detection service: {}",
                camera_id, error
            ),
            Outcome::NoMatch {
                camera_id,
                camera_name,
                elapsed_s,
            } => write!(
                f,
                "Camera {}: ignoring movement on {} (analysed in {:.1}s)",
                camera_id, camera_name, elapsed_s
            ),
            Outcome::Matched {
                camera_id,
                camera_name,
                prediction,
                elapsed_s,
            } => write!(
                f,
                "Camera {}: recording {}, found {} ({}%) (analysed in {:.1}s)",
                camera_id,
                camera_name,
                prediction.label,
                prediction.confidence_percent(),
                elapsed_s
            ),
        }
    }
}

/// Collaborators the engine drives.
pub struct Collaborators {
    pub snapshots: Box<dyn SnapshotSource>,
    pub detector: Box<dyn ObjectDetector>,
    pub notifier: Box<dyn Notifier>,
    pub evidence: Box<dyn EvidenceWriter>,
}

pub struct Engine {
    settings: Settings,
    cameras: CameraRegistry,
    accessory_webhook: Option<String>,
    debounce: DebounceStore,
    snapshots: Box<dyn SnapshotSource>,
    detector: Box<dyn ObjectDetector>,
    notifier: Box<dyn Notifier>,
    evidence: Box<dyn EvidenceWriter>,
}

impl Engine {
    pub fn new(
        settings: Settings,
        cameras: CameraRegistry,
        accessory_webhook: Option<String>,
        debounce: DebounceStore,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            settings,
            cameras,
            accessory_webhook,
            debounce,
            snapshots: collaborators.snapshots,
            detector: collaborators.detector,
            notifier: collaborators.notifier,
            evidence: collaborators.evidence,
        }
    }

    /// Handle a motion event for `camera_id` at the current wall-clock time.
    pub fn handle(&self, camera_id: &str) -> Outcome {
        let now = match now_s() {
            Ok(now) => now,
            Err(err) => {
                log::error!("system clock before unix epoch: {}", err);
                0
            }
        };
        self.handle_at(camera_id, now)
    }

    /// Handle a motion event with an explicit epoch-seconds clock reading.
    pub fn handle_at(&self, camera_id: &str, now: u64) -> Outcome {
        let outcome = self.run(camera_id, now);
        log::info!("{}", outcome);
        outcome
    }

    fn run(&self, camera_id: &str, now: u64) -> Outcome {
        let started = Instant::now();

        let Some(camera) = self.cameras.get(camera_id) else {
            return Outcome::NotConfigured {
                camera_id: camera_id.to_string(),
            };
        };

        if let Some(seconds_ago) = self.cooling_down(camera_id, now) {
            return Outcome::Skipped {
                camera_id: camera_id.to_string(),
                seconds_ago,
                interval_s: self.debounce.interval().as_secs(),
            };
        }

        log::info!("camera {}: processing event", camera_id);

        let snapshot = match self.snapshots.snapshot(camera_id) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                log::error!("camera {}: could not get snapshot: {}", camera_id, error);
                return Outcome::SnapshotFailed {
                    camera_id: camera_id.to_string(),
                    error,
                };
            }
        };

        let predictions = match self.detector.detect(&snapshot.bytes) {
            Ok(predictions) => predictions,
            Err(error) => {
                log::error!(
                    "camera {}: {} detection failed: {}",
                    camera_id,
                    self.detector.name(),
                    error
                );
                return Outcome::DetectionFailed {
                    camera_id: camera_id.to_string(),
                    error,
                };
            }
        };

        let result = filter::evaluate(&predictions, camera, &self.settings);
        let elapsed_s = started.elapsed().as_secs_f64();

        let Some(prediction) = result.matched_prediction().cloned() else {
            return Outcome::NoMatch {
                camera_id: camera_id.to_string(),
                camera_name: camera.name.clone(),
                elapsed_s,
            };
        };
        log::debug!("camera {}: matched prediction {:?}", camera_id, prediction);

        if let Err(err) = self.debounce.record(camera_id, now) {
            log::error!("camera {}: failed to record trigger time: {}", camera_id, err);
        }
        self.notify(camera);
        if let Err(err) = self.evidence.persist(camera, &snapshot, &result.matches) {
            log::error!("camera {}: failed to save capture: {:#}", camera_id, err);
        }

        Outcome::Matched {
            camera_id: camera_id.to_string(),
            camera_name: camera.name.clone(),
            prediction,
            elapsed_s,
        }
    }

    /// Seconds since the last trigger when still inside the interval.
    ///
    /// Store failures are logged and treated as "not cooling down".
    fn cooling_down(&self, camera_id: &str, now: u64) -> Option<u64> {
        let skip = match self.debounce.should_skip(camera_id, now) {
            Ok(skip) => skip,
            Err(err) => {
                log::warn!("camera {}: debounce lookup failed: {}", camera_id, err);
                return None;
            }
        };
        if !skip {
            return None;
        }
        self.debounce
            .seconds_since_trigger(camera_id, now)
            .ok()
            .flatten()
            .or(Some(0))
    }

    fn notify(&self, camera: &CameraPolicy) {
        match &camera.trigger_url {
            Some(url) => {
                if let Err(err) = self.notifier.trigger(url) {
                    log::warn!("camera {}: trigger webhook failed: {}", camera.id, err);
                }
            }
            None => log::warn!("camera {}: no trigger_url configured", camera.id),
        }

        if let (Some(base_url), Some(accessory_id)) =
            (&self.accessory_webhook, &camera.homekit_accessory_id)
        {
            if let Err(err) = self.notifier.accessory_state(base_url, accessory_id, true) {
                log::warn!("camera {}: accessory webhook failed: {}", camera.id, err);
            }
        }
    }
}
