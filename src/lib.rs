//! Motion event verification.
//!
//! A motion trigger for a camera is confirmed by pulling a snapshot from the
//! surveillance platform, running it through an object detector and applying
//! the configured decision policy. Confirmed events fire the camera's
//! webhooks and leave an annotated evidence image behind; repeated triggers
//! inside the cooldown window are skipped.
//!
//! # Module Structure
//!
//! - `session`: platform login and snapshot retrieval with transparent re-login
//! - `detect`: detector trait, Deepstack HTTP client, prediction types
//! - `filter`: label / size / confidence / ignore-area decision rule
//! - `debounce`: per-camera cooldown over a persistent trigger store
//! - `engine`: the per-request workflow tying the above together
//! - `notify`, `evidence`: side effects of a confirmed event
//! - `api`: the `GET /{camera_id}` front end
//! - `config`: settings and camera documents

pub mod api;
pub mod config;
pub mod debounce;
pub mod detect;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod filter;
pub mod geometry;
pub mod notify;
pub mod session;

pub use config::{CameraPolicy, CameraRegistry, ServiceConfig, Settings};
pub use debounce::{DebounceStore, InMemoryTriggerStore, SqliteTriggerStore, TriggerStore};
pub use detect::{DeepstackClient, ObjectDetector, Prediction, StubDetector};
pub use engine::{Collaborators, Engine, Outcome};
pub use error::{AuthError, DetectionError, NotifyError, RetrievalError};
pub use evidence::{CaptureDirWriter, EvidenceWriter};
pub use filter::{evaluate, MatchResult};
pub use geometry::Rectangle;
pub use notify::{HttpNotifier, Notifier};
pub use session::{SessionManager, Snapshot, SnapshotSource};
