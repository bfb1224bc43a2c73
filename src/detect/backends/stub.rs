use std::sync::atomic::{AtomicUsize, Ordering};

use crate::detect::backend::ObjectDetector;
use crate::detect::result::Prediction;
use crate::error::DetectionError;

/// Stub detector for testing. Returns a fixed answer and counts calls.
pub struct StubDetector {
    reply: Result<Vec<Prediction>, String>,
    calls: AtomicUsize,
}

impl StubDetector {
    pub fn with_predictions(predictions: Vec<Prediction>) -> Self {
        Self {
            reply: Ok(predictions),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every call fails with a transport error carrying `reason`.
    pub fn failing(reason: &str) -> Self {
        Self {
            reply: Err(reason.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ObjectDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, _image: &[u8]) -> Result<Vec<Prediction>, DetectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Ok(predictions) => Ok(predictions.clone()),
            Err(reason) => Err(DetectionError::Transport(reason.clone())),
        }
    }
}
