//! HTTP client for a Deepstack-compatible detection server.
//!
//! The snapshot is posted as `multipart/form-data` (field `image`) to
//! `/v1/vision/detection`; the JSON reply is parsed by
//! [`parse_detection_response`].

use std::io::Read;
use std::time::{Duration, Instant};

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use url::Url;

use crate::detect::backend::ObjectDetector;
use crate::detect::result::{parse_detection_response, Prediction};
use crate::error::{diagnostic_body, DetectionError};

pub const DETECTION_PATH: &str = "/v1/vision/detection";

const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

pub struct DeepstackClient {
    client: Client,
    endpoint: Url,
}

impl DeepstackClient {
    /// `base_url` is the server root; the detection path replaces any path it carries.
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let endpoint = Url::parse(base_url)
            .and_then(|base| base.join(DETECTION_PATH))
            .map_err(|e| anyhow::anyhow!("invalid detection url {}: {}", base_url, e))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build detection client: {}", e))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn image_form(image: &[u8]) -> Result<Form, DetectionError> {
    let part = Part::bytes(image.to_vec())
        .file_name("snapshot.jpg")
        .mime_str("image/jpeg")
        .map_err(|e| DetectionError::Transport(e.to_string()))?;
    Ok(Form::new().part("image", part))
}

impl ObjectDetector for DeepstackClient {
    fn name(&self) -> &'static str {
        "deepstack"
    }

    fn detect(&self, image: &[u8]) -> Result<Vec<Prediction>, DetectionError> {
        let form = image_form(image)?;

        let started = Instant::now();
        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .map_err(|e| DetectionError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_limited(response).unwrap_or_default();
            return Err(DetectionError::Status {
                status: status.as_u16(),
                body: diagnostic_body(&body),
            });
        }

        let body = read_limited(response).map_err(|e| DetectionError::Transport(e.to_string()))?;
        log::debug!(
            "detection reply in {:.2}s: {}",
            started.elapsed().as_secs_f64(),
            String::from_utf8_lossy(&body)
        );
        parse_detection_response(&body)
    }
}

fn read_limited(response: Response) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::new();
    response.take(MAX_RESPONSE_BYTES).read_to_end(&mut body)?;
    Ok(body)
}
