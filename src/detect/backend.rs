use crate::detect::result::Prediction;
use crate::error::DetectionError;

/// Object detector trait.
///
/// The detector is a remote black box: image bytes in, labeled boxes out.
/// Implementations must bound every call with a timeout and report
/// malformed replies or connection failures as errors, never as an empty
/// prediction list.
pub trait ObjectDetector: Send + Sync {
    /// Backend identifier, used in logs.
    fn name(&self) -> &'static str;

    /// Run detection on an encoded image (JPEG as delivered by the platform).
    fn detect(&self, image: &[u8]) -> Result<Vec<Prediction>, DetectionError>;
}
