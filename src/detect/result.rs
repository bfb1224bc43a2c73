use serde::{Deserialize, Serialize};

use crate::error::DetectionError;
use crate::geometry::Rectangle;

/// One labeled bounding box returned by the detection service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    /// 0.0..=1.0 as reported by the service.
    pub confidence: f64,
    /// Edges are flattened next to `label` and `confidence` on the wire.
    #[serde(flatten)]
    pub bounds: Rectangle,
}

impl Prediction {
    pub fn new(label: &str, confidence: f64, bounds: Rectangle) -> Self {
        Self {
            label: label.to_string(),
            confidence,
            bounds,
        }
    }

    /// Confidence as an integer percentage, rounded half to even.
    pub fn confidence_percent(&self) -> i64 {
        (self.confidence * 100.0).round_ties_even() as i64
    }
}

/// Detection endpoint reply.
///
/// `{"success": true, "predictions": [...]}` on success,
/// `{"success": false, "error": "..."}` otherwise.
#[derive(Debug, Deserialize)]
struct DetectionResponse {
    #[serde(default = "default_success")]
    success: bool,
    predictions: Option<Vec<Prediction>>,
    error: Option<String>,
}

fn default_success() -> bool {
    true
}

/// Parse a detection reply body into predictions.
///
/// An empty prediction list is a valid answer. A missing list or an explicit
/// `success: false` is a failure.
pub fn parse_detection_response(body: &[u8]) -> Result<Vec<Prediction>, DetectionError> {
    let response: DetectionResponse = serde_json::from_slice(body)?;
    if !response.success {
        return Err(DetectionError::Unsuccessful(
            response
                .error
                .unwrap_or_else(|| "no error message".to_string()),
        ));
    }
    response
        .predictions
        .ok_or_else(|| DetectionError::Unsuccessful("response has no predictions".to_string()))
}
