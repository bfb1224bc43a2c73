//! Decision rule turning raw predictions into a match verdict.
//!
//! A camera event matches when at least one prediction passes every check:
//! its label is wanted, its box is strictly larger than the minimum size,
//! its rounded confidence percent is strictly above the minimum, and it is
//! not strictly inside any of the camera's ignore areas.

use crate::config::{CameraPolicy, Settings};
use crate::detect::Prediction;

/// Outcome of [`evaluate`]: every matching prediction, in input order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatchResult {
    pub matches: Vec<Prediction>,
}

impl MatchResult {
    pub fn matched(&self) -> bool {
        !self.matches.is_empty()
    }

    /// First matching prediction in input order.
    pub fn matched_prediction(&self) -> Option<&Prediction> {
        self.matches.first()
    }
}

pub fn evaluate(
    predictions: &[Prediction],
    policy: &CameraPolicy,
    settings: &Settings,
) -> MatchResult {
    let matches = predictions
        .iter()
        .filter(|prediction| is_actionable(prediction, policy, settings))
        .cloned()
        .collect();
    MatchResult { matches }
}

fn is_actionable(prediction: &Prediction, policy: &CameraPolicy, settings: &Settings) -> bool {
    let confidence = prediction.confidence_percent();
    let width = prediction.bounds.width();
    let height = prediction.bounds.height();

    let label_wanted = settings.detection_labels.contains(&prediction.label);
    let fits_size = width > settings.min_size_x && height > settings.min_size_y;
    let confident = confidence > settings.min_confidence;
    let ignored = ignored_by(prediction, policy);

    log::debug!(
        "camera {}: {} ({}%) {}x{} fits={} label={} confidence={} ignored={}",
        policy.id,
        prediction.label,
        confidence,
        width,
        height,
        fits_size,
        label_wanted,
        confident,
        ignored
    );

    let found = label_wanted && fits_size && confident && !ignored;
    if found {
        log::info!(
            "found {} in camera {} ({}% confidence)",
            prediction.label,
            policy.id,
            confidence
        );
    }
    found
}

fn ignored_by(prediction: &Prediction, policy: &CameraPolicy) -> bool {
    match policy
        .ignore_areas
        .iter()
        .find(|area| area.strictly_contains(&prediction.bounds))
    {
        Some(area) => {
            log::debug!(
                "object {} inside ignore area {}",
                prediction.bounds,
                area
            );
            true
        }
        None => false,
    }
}
