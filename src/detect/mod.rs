mod backend;
mod backends;
mod result;

pub use backend::ObjectDetector;
pub use backends::{DeepstackClient, StubDetector};
pub use result::{parse_detection_response, Prediction};
