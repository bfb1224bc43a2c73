use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::geometry::Rectangle;

pub const DEFAULT_SETTINGS_PATH: &str = "/config/settings.json";
pub const DEFAULT_CAMERAS_PATH: &str = "/config/cameras.json";

const DEFAULT_CAPTURE_DIR: &str = "/capture_dir";
const DEFAULT_DETECTION_LABELS: [&str; 2] = ["car", "person"];
const DEFAULT_MIN_CONFIDENCE: i64 = 0;
const DEFAULT_MIN_SIZE: i64 = 0;
const DEFAULT_TIMEOUT_SECS: u64 = 10;
// Stops a camera flooding notifications.
const DEFAULT_TRIGGER_INTERVAL_SECS: u64 = 60;
const DEFAULT_DEBOUNCE_DB: &str = "/tmp/motion-verify-debounce.db";

/// Historical camelCase spellings and their canonical keys.
const LEGACY_SETTINGS_KEYS: [(&str, &str); 5] = [
    ("captureDir", "capture_dir"),
    ("deepstackUrl", "deepstack_url"),
    ("homebridgeWebhookUrl", "homebridge_webhook_url"),
    ("sssUrl", "sss_url"),
    ("triggerInterval", "trigger_interval"),
];

const LEGACY_CAMERA_KEYS: [(&str, &str); 2] = [
    ("triggerUrl", "trigger_url"),
    ("homekitAccId", "homekit_acc_id"),
];

#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    capture_dir: Option<PathBuf>,
    detection_labels: Option<Vec<String>>,
    min_confidence: Option<i64>,
    min_sizex: Option<i64>,
    min_sizey: Option<i64>,
    timeout: Option<u64>,
    trigger_interval: Option<u64>,
    sss_url: Option<String>,
    deepstack_url: Option<String>,
    homebridge_webhook_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    debounce_db: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CameraFile {
    name: String,
    trigger_url: Option<String>,
    homekit_acc_id: Option<String>,
    #[serde(default)]
    ignore_areas: Vec<Rectangle>,
}

/// Decision policy shared by every camera.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub detection_labels: BTreeSet<String>,
    /// Integer percent; a prediction must exceed it.
    pub min_confidence: i64,
    pub min_size_x: i64,
    pub min_size_y: i64,
    pub trigger_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            detection_labels: DEFAULT_DETECTION_LABELS
                .iter()
                .map(|label| label.to_string())
                .collect(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            min_size_x: DEFAULT_MIN_SIZE,
            min_size_y: DEFAULT_MIN_SIZE,
            trigger_interval: Duration::from_secs(DEFAULT_TRIGGER_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Per-camera policy, read-only for the process lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraPolicy {
    pub id: String,
    pub name: String,
    pub trigger_url: Option<String>,
    pub homekit_accessory_id: Option<String>,
    pub ignore_areas: Vec<Rectangle>,
}

impl CameraPolicy {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            trigger_url: None,
            homekit_accessory_id: None,
            ignore_areas: Vec::new(),
        }
    }
}

/// Camera policies keyed by platform camera id.
#[derive(Debug, Clone, Default)]
pub struct CameraRegistry {
    cameras: BTreeMap<String, CameraPolicy>,
}

impl CameraRegistry {
    pub fn new(cameras: impl IntoIterator<Item = CameraPolicy>) -> Self {
        Self {
            cameras: cameras
                .into_iter()
                .map(|camera| (camera.id.clone(), camera))
                .collect(),
        }
    }

    pub fn get(&self, camera_id: &str) -> Option<&CameraPolicy> {
        self.cameras.get(camera_id)
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    /// Parse a `cameras.json` document (`{"<id>": {...}, ...}`).
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut doc: Map<String, Value> =
            serde_json::from_str(raw).context("cameras document must be a JSON object")?;
        let mut cameras = Vec::with_capacity(doc.len());
        for (id, value) in doc.iter_mut() {
            if let Value::Object(fields) = value {
                apply_legacy_keys(fields, &LEGACY_CAMERA_KEYS);
            }
            let file: CameraFile = serde_json::from_value(value.take())
                .map_err(|e| anyhow!("invalid camera {}: {}", id, e))?;
            cameras.push(CameraPolicy {
                id: id.clone(),
                name: file.name,
                trigger_url: non_empty(file.trigger_url),
                homekit_accessory_id: non_empty(file.homekit_acc_id),
                ignore_areas: file.ignore_areas,
            });
        }
        Ok(Self::new(cameras))
    }
}

/// Credentials and location of the snapshot platform.
#[derive(Clone)]
pub struct PlatformSettings {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for PlatformSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformSettings")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the daemon needs, resolved from both documents and the environment.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub settings: Settings,
    pub cameras: CameraRegistry,
    pub platform: PlatformSettings,
    pub detection_url: String,
    pub homebridge_webhook_url: Option<String>,
    pub capture_dir: PathBuf,
    pub debounce_db: String,
}

impl ServiceConfig {
    /// Load from the `SETTINGS_JSON` / `CAMERAS_JSON` paths (or their defaults).
    pub fn load() -> Result<Self> {
        let settings_path = std::env::var("SETTINGS_JSON")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SETTINGS_PATH.to_string());
        let cameras_path = std::env::var("CAMERAS_JSON")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CAMERAS_PATH.to_string());
        Self::load_from(Path::new(&settings_path), Path::new(&cameras_path))
    }

    pub fn load_from(settings_path: &Path, cameras_path: &Path) -> Result<Self> {
        let settings_raw = read_config_file(settings_path)?;
        let cameras_raw = read_config_file(cameras_path)?;
        let cameras = CameraRegistry::from_json(&cameras_raw)
            .with_context(|| format!("invalid cameras file {}", cameras_path.display()))?;
        let file = parse_settings(&settings_raw)
            .with_context(|| format!("invalid settings file {}", settings_path.display()))?;
        let mut cfg = Self::from_file(file, cameras);
        cfg.apply_env()?;
        cfg.validate()?;
        log::debug!("settings {:#?}", cfg.settings);
        log::debug!("cameras {:#?}", cfg.cameras);
        Ok(cfg)
    }

    fn from_file(file: SettingsFile, cameras: CameraRegistry) -> Self {
        let defaults = Settings::default();
        let settings = Settings {
            detection_labels: file
                .detection_labels
                .map(|labels| labels.into_iter().collect())
                .unwrap_or(defaults.detection_labels),
            min_confidence: file.min_confidence.unwrap_or(defaults.min_confidence),
            min_size_x: file.min_sizex.unwrap_or(defaults.min_size_x),
            min_size_y: file.min_sizey.unwrap_or(defaults.min_size_y),
            trigger_interval: file
                .trigger_interval
                .map(Duration::from_secs)
                .unwrap_or(defaults.trigger_interval),
            request_timeout: file
                .timeout
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        };
        Self {
            settings,
            cameras,
            platform: PlatformSettings {
                url: file.sss_url.unwrap_or_default(),
                username: file.username.unwrap_or_default(),
                password: file.password.unwrap_or_default(),
            },
            detection_url: file.deepstack_url.unwrap_or_default(),
            homebridge_webhook_url: non_empty(file.homebridge_webhook_url),
            capture_dir: file
                .capture_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CAPTURE_DIR)),
            debounce_db: file
                .debounce_db
                .unwrap_or_else(|| DEFAULT_DEBOUNCE_DB.to_string()),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_value("SSS_URL") {
            self.platform.url = url;
        }
        if let Some(username) = env_value("SSS_USERNAME") {
            self.platform.username = username;
        }
        if let Some(password) = env_value("SSS_PASSWORD") {
            self.platform.password = password;
        }
        if let Some(url) = env_value("DEEPSTACK_URL") {
            self.detection_url = url;
        }
        if let Some(dir) = env_value("CAPTURE_DIR") {
            self.capture_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_value("DEBOUNCE_DB") {
            self.debounce_db = path;
        }
        if let Some(interval) = env_value("TRIGGER_INTERVAL") {
            let seconds: u64 = interval.parse().map_err(|_| {
                anyhow!("TRIGGER_INTERVAL must be an integer number of seconds")
            })?;
            self.settings.trigger_interval = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        require("sss_url", &self.platform.url)?;
        require("username", &self.platform.username)?;
        require("password", &self.platform.password)?;
        require("deepstack_url", &self.detection_url)?;
        for (key, value) in [
            ("sss_url", Some(&self.platform.url)),
            ("deepstack_url", Some(&self.detection_url)),
            ("homebridge_webhook_url", self.homebridge_webhook_url.as_ref()),
        ] {
            if let Some(value) = value {
                url::Url::parse(value).map_err(|e| anyhow!("{} is not a valid url: {}", key, e))?;
            }
        }
        if !(0..=100).contains(&self.settings.min_confidence) {
            return Err(anyhow!(
                "min_confidence must be a percentage between 0 and 100, got {}",
                self.settings.min_confidence
            ));
        }
        if self.settings.request_timeout.is_zero() {
            return Err(anyhow!("timeout must be greater than zero"));
        }
        if self.cameras.is_empty() {
            log::warn!("no cameras configured; every trigger will be rejected");
        }
        Ok(())
    }
}

fn parse_settings(raw: &str) -> Result<SettingsFile> {
    let mut doc: Map<String, Value> =
        serde_json::from_str(raw).context("settings document must be a JSON object")?;
    apply_legacy_keys(&mut doc, &LEGACY_SETTINGS_KEYS);
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Move each legacy key onto its canonical name unless the canonical key
/// already carries a non-null value. The legacy key is always removed.
fn apply_legacy_keys(doc: &mut Map<String, Value>, aliases: &[(&str, &str)]) {
    for (legacy, canonical) in aliases {
        let Some(value) = doc.remove(*legacy) else {
            continue;
        };
        let canonical_missing = doc.get(*canonical).map_or(true, Value::is_null);
        if canonical_missing {
            doc.insert(canonical.to_string(), value);
        }
    }
}

fn read_config_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))
}

fn require(key: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{} must be set", key));
    }
    Ok(())
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
