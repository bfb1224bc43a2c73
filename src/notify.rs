//! Outbound webhooks fired on a positive detection.
//!
//! Delivery is best-effort: callers log failures and move on.

use std::time::Duration;
use url::Url;

use crate::error::NotifyError;

pub trait Notifier: Send + Sync {
    /// GET the camera's trigger URL.
    fn trigger(&self, url: &str) -> Result<(), NotifyError>;

    /// Tell the home-automation bridge at `base_url` that `accessory_id`
    /// changed to `state`.
    fn accessory_state(
        &self,
        base_url: &str,
        accessory_id: &str,
        state: bool,
    ) -> Result<(), NotifyError>;
}

pub struct HttpNotifier {
    agent: ureq::Agent,
}

impl HttpNotifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn get(&self, url: &str) -> Result<u16, NotifyError> {
        log::debug!("GET {}", url);
        match self.agent.get(url).call() {
            Ok(response) => Ok(response.status()),
            Err(ureq::Error::Status(status, _)) => Err(NotifyError::Status {
                url: url.to_string(),
                status,
            }),
            Err(ureq::Error::Transport(err)) => Err(NotifyError::Transport {
                url: url.to_string(),
                reason: err.to_string(),
            }),
        }
    }
}

impl Notifier for HttpNotifier {
    fn trigger(&self, url: &str) -> Result<(), NotifyError> {
        let status = self.get(url)?;
        log::debug!("trigger webhook {} answered {}", url, status);
        Ok(())
    }

    fn accessory_state(
        &self,
        base_url: &str,
        accessory_id: &str,
        state: bool,
    ) -> Result<(), NotifyError> {
        let url = accessory_url(base_url, accessory_id, state)?;
        let status = self.get(url.as_str())?;
        log::debug!("sent message to accessory webhook: {}", status);
        Ok(())
    }
}

/// `{base}/?accessoryId=<id>&state=<bool>`
pub fn accessory_url(base_url: &str, accessory_id: &str, state: bool) -> Result<Url, NotifyError> {
    let mut url = Url::parse(&format!("{}/", base_url.trim_end_matches('/'))).map_err(|e| {
        NotifyError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        }
    })?;
    url.query_pairs_mut()
        .append_pair("accessoryId", accessory_id)
        .append_pair("state", if state { "true" } else { "false" });
    Ok(url)
}
