//! Authenticated snapshot retrieval from a Surveillance Station-style platform.
//!
//! The platform is stateful: a login returns a session cookie that later
//! snapshot requests must present. When a snapshot request comes back with an
//! authentication failure the manager logs in again exactly once and retries
//! the snapshot once. Re-login runs inside a mutex and is skipped when another
//! request already refreshed the session, so concurrent failures cause a
//! single re-authentication.

use serde::Deserialize;
use std::io::Read;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;
use url::Url;

use crate::config::PlatformSettings;
use crate::error::{diagnostic_body, AuthError, RetrievalError};

pub const LOGIN_PATH: &str = "/webapi/auth.cgi";
pub const SNAPSHOT_PATH: &str = "/webapi/entry.cgi";

/// Session scope requested at login.
const SESSION_SCOPE: &str = "SurveillanceStation";
const SNAPSHOT_API: &str = "\"SYNO.SurveillanceStation.Camera\"";

/// Platform error codes meaning the session is missing, expired or revoked.
const SESSION_ERROR_CODES: [i64; 4] = [105, 106, 107, 119];

const MAX_SNAPSHOT_BYTES: u64 = 20 * 1024 * 1024;
const MAX_REPLY_BYTES: u64 = 64 * 1024;

/// A still image fetched at event time. Owned; nothing on disk backs it.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub camera_id: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Anything able to produce a snapshot for a camera id.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self, camera_id: &str) -> Result<Snapshot, RetrievalError>;
}

#[derive(Clone, Debug, Default)]
struct SessionToken {
    cookie: Option<String>,
    /// Bumped on every successful login.
    generation: u64,
}

/// JSON envelope used by the platform for API replies and errors.
#[derive(Debug, Deserialize)]
struct ApiReply {
    success: Option<bool>,
    data: Option<LoginData>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    sid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
}

enum SnapshotReply {
    Image(Snapshot),
    AuthFailure { status: u16, body: String },
}

pub struct SessionManager {
    agent: ureq::Agent,
    base_url: Url,
    username: String,
    password: String,
    current: RwLock<SessionToken>,
    relogin: Mutex<()>,
}

impl SessionManager {
    /// Build a manager without logging in.
    pub fn new(platform: &PlatformSettings, timeout: Duration) -> Result<Self, AuthError> {
        let base_url = Url::parse(&platform.url)
            .map_err(|e| AuthError::InvalidUrl(format!("{}: {}", platform.url, e)))?;
        Ok(Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base_url,
            username: platform.username.clone(),
            password: platform.password.clone(),
            current: RwLock::new(SessionToken::default()),
            relogin: Mutex::new(()),
        })
    }

    /// Build a manager and log in. Startup aborts on error.
    pub fn connect(platform: &PlatformSettings, timeout: Duration) -> Result<Self, AuthError> {
        let manager = Self::new(platform, timeout)?;
        manager.login()?;
        Ok(manager)
    }

    /// Log in and replace the current session. Never retried here.
    pub fn login(&self) -> Result<(), AuthError> {
        let cookie = self.authenticate()?;
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        current.cookie = cookie;
        current.generation += 1;
        log::info!(
            "logged in to {} (session {})",
            self.base_url,
            current.generation
        );
        Ok(())
    }

    /// Number of successful logins so far.
    pub fn session_generation(&self) -> u64 {
        self.token().generation
    }

    pub fn snapshot(&self, camera_id: &str) -> Result<Snapshot, RetrievalError> {
        let token = self.token();
        match self.fetch_snapshot(camera_id, &token)? {
            SnapshotReply::Image(snapshot) => return Ok(snapshot),
            SnapshotReply::AuthFailure { status, body } => {
                log::warn!(
                    "camera {}: snapshot refused ({}: {}), re-authenticating",
                    camera_id,
                    status,
                    body
                );
            }
        }

        self.reauthenticate(token.generation)
            .map_err(RetrievalError::Reauthentication)?;

        let token = self.token();
        match self.fetch_snapshot(camera_id, &token)? {
            SnapshotReply::Image(snapshot) => Ok(snapshot),
            SnapshotReply::AuthFailure { status, body } => {
                Err(RetrievalError::Status { status, body })
            }
        }
    }

    fn token(&self) -> SessionToken {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Log in again unless the session already moved past `stale_generation`.
    fn reauthenticate(&self, stale_generation: u64) -> Result<(), AuthError> {
        let _guard = self.relogin.lock().unwrap_or_else(PoisonError::into_inner);
        if self.token().generation != stale_generation {
            log::debug!("session already refreshed by a concurrent request");
            return Ok(());
        }
        self.login()
    }

    fn authenticate(&self) -> Result<Option<String>, AuthError> {
        let mut url = self
            .base_url
            .join(LOGIN_PATH)
            .map_err(|e| AuthError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("api", "SYNO.API.Auth")
            .append_pair("method", "Login")
            .append_pair("version", "1")
            .append_pair("account", &self.username)
            .append_pair("passwd", &self.password)
            .append_pair("session", SESSION_SCOPE);

        log::debug!("GET {}{}", self.base_url, LOGIN_PATH);
        let response = match self.agent.get(url.as_str()).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let body = read_body(response, MAX_REPLY_BYTES).unwrap_or_default();
                return Err(AuthError::Rejected {
                    status,
                    body: diagnostic_body(&body),
                });
            }
            Err(ureq::Error::Transport(err)) => {
                log::error!("login error: {}", err);
                return Err(AuthError::Transport(err.to_string()));
            }
        };

        let status = response.status();
        let cookie = session_cookie(&response);
        let body =
            read_body(response, MAX_REPLY_BYTES).map_err(|e| AuthError::Transport(e.to_string()))?;

        // Non-JSON success bodies are accepted as-is.
        let reply = serde_json::from_slice::<ApiReply>(&body).ok();
        if let Some(reply) = &reply {
            if reply.success == Some(false) {
                return Err(AuthError::Rejected {
                    status,
                    body: diagnostic_body(&body),
                });
            }
        }

        let sid_cookie = reply
            .and_then(|reply| reply.data)
            .and_then(|data| data.sid)
            .map(|sid| format!("id={}", sid));
        Ok(cookie.or(sid_cookie))
    }

    fn fetch_snapshot(
        &self,
        camera_id: &str,
        token: &SessionToken,
    ) -> Result<SnapshotReply, RetrievalError> {
        let mut url = self
            .base_url
            .join(SNAPSHOT_PATH)
            .map_err(|e| RetrievalError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("camStm", "1")
            .append_pair("version", "2")
            .append_pair("cameraId", camera_id)
            .append_pair("api", SNAPSHOT_API)
            .append_pair("method", "GetSnapshot");

        log::debug!("GET {}", url);
        let mut request = self.agent.get(url.as_str());
        if let Some(cookie) = &token.cookie {
            request = request.set("Cookie", cookie);
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let body =
                    diagnostic_body(&read_body(response, MAX_REPLY_BYTES).unwrap_or_default());
                if status == 401 || status == 403 {
                    return Ok(SnapshotReply::AuthFailure { status, body });
                }
                return Err(RetrievalError::Status { status, body });
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(RetrievalError::Transport(err.to_string()))
            }
        };

        let status = response.status();
        let content_type = response.header("Content-Type").map(str::to_string);
        let bytes = read_snapshot(response.into_reader(), status, MAX_SNAPSHOT_BYTES)?;

        if bytes.is_empty() {
            return Err(RetrievalError::Status {
                status,
                body: "empty snapshot".to_string(),
            });
        }

        if looks_like_json(content_type.as_deref(), &bytes) {
            if let Ok(reply) = serde_json::from_slice::<ApiReply>(&bytes) {
                let body = diagnostic_body(&bytes);
                let code = reply.error.map(|e| e.code);
                if reply.success == Some(false)
                    && code.is_some_and(|code| SESSION_ERROR_CODES.contains(&code))
                {
                    return Ok(SnapshotReply::AuthFailure { status, body });
                }
                return Err(RetrievalError::Status { status, body });
            }
        }

        log::debug!("camera {}: snapshot of {} bytes", camera_id, bytes.len());
        Ok(SnapshotReply::Image(Snapshot {
            camera_id: camera_id.to_string(),
            bytes,
            content_type,
        }))
    }
}

impl SnapshotSource for SessionManager {
    fn snapshot(&self, camera_id: &str) -> Result<Snapshot, RetrievalError> {
        SessionManager::snapshot(self, camera_id)
    }
}

/// All cookies set by the response, as a `Cookie` header value.
fn session_cookie(response: &ureq::Response) -> Option<String> {
    let pairs: Vec<&str> = response
        .all("Set-Cookie")
        .into_iter()
        .filter_map(|header| header.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

fn looks_like_json(content_type: Option<&str>, bytes: &[u8]) -> bool {
    if content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("json")) {
        return true;
    }
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{')
}

/// Reads at most `limit` bytes; anything beyond is dropped. For replies that
/// are only parsed or logged.
fn read_body(response: ureq::Response, limit: u64) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::new();
    response.into_reader().take(limit).read_to_end(&mut body)?;
    Ok(body)
}

/// Reads a whole snapshot, failing instead of truncating when the image is
/// larger than `limit`.
fn read_snapshot<R: Read>(
    reader: R,
    status: u16,
    limit: u64,
) -> Result<Vec<u8>, RetrievalError> {
    let mut bytes = Vec::new();
    reader.take(limit + 1).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > limit {
        return Err(RetrievalError::Status {
            status,
            body: format!("snapshot exceeds {} bytes", limit),
        });
    }
    Ok(bytes)
}
