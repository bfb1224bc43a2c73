pub mod deepstack;
pub mod stub;

pub use deepstack::DeepstackClient;
pub use stub::StubDetector;
