#![cfg(feature = "annotate")]

mod common;

use std::io::Cursor;
use std::time::Duration;

use common::{closed_port_url, StubResponse, StubServer};
use motion_verify::config::PlatformSettings;
use motion_verify::session::{LOGIN_PATH, SNAPSHOT_PATH};
use motion_verify::{
    CameraPolicy, CameraRegistry, CaptureDirWriter, Collaborators, DebounceStore,
    DeepstackClient, DetectionError, Engine, HttpNotifier, Notifier, NotifyError, ObjectDetector,
    Outcome, Rectangle, SessionManager, Settings,
};
use tempfile::tempdir;

const DETECTION_PATH: &str = "/v1/vision/detection";
const T0: u64 = 1_700_000_000;

fn test_jpeg() -> Vec<u8> {
    let image = image::RgbImage::from_pixel(320, 240, image::Rgb([40, 40, 40]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .expect("encode test jpeg");
    out.into_inner()
}

fn timeout() -> Duration {
    Duration::from_secs(5)
}

fn detection_reply(label: &str, confidence: f64, bounds: (i64, i64, i64, i64)) -> String {
    format!(
        r#"{{"success":true,"predictions":[{{"label":"{}","confidence":{},"x_min":{},"y_min":{},"x_max":{},"y_max":{}}}]}}"#,
        label, confidence, bounds.0, bounds.1, bounds.2, bounds.3
    )
}

fn platform_server(detection: String) -> StubServer {
    let jpeg = test_jpeg();
    StubServer::start(move |req| match req.path.as_str() {
        LOGIN_PATH => StubResponse::json(r#"{"success":true,"data":{"sid":"s1"}}"#)
            .with_header("Set-Cookie", "id=s1; path=/"),
        SNAPSHOT_PATH => {
            StubResponse::ok(jpeg.clone()).with_header("Content-Type", "image/jpeg")
        }
        DETECTION_PATH => StubResponse::json(&detection),
        _ => StubResponse::ok("ok"),
    })
}

#[test]
fn motion_event_flows_through_real_collaborators() {
    let server = platform_server(detection_reply("person", 0.92, (20, 30, 140, 220)));
    let captures = tempdir().unwrap();

    let mut camera = CameraPolicy::new("1", "Front Door");
    camera.trigger_url = Some(format!("{}/trigger/1", server.url()));
    camera.homekit_accessory_id = Some("front-motion".to_string());
    camera.ignore_areas = vec![Rectangle::new(200, 0, 320, 100)];

    let session = SessionManager::connect(
        &PlatformSettings {
            url: server.url(),
            username: "admin".to_string(),
            password: "secret".to_string(),
        },
        timeout(),
    )
    .unwrap();
    let settings = Settings {
        min_confidence: 60,
        ..Settings::default()
    };
    let engine = Engine::new(
        settings.clone(),
        CameraRegistry::new([camera]),
        Some(server.url()),
        DebounceStore::in_memory(settings.trigger_interval),
        Collaborators {
            snapshots: Box::new(session),
            detector: Box::new(DeepstackClient::new(&server.url(), timeout()).unwrap()),
            notifier: Box::new(HttpNotifier::new(timeout())),
            evidence: Box::new(CaptureDirWriter::new(captures.path())),
        },
    );

    let outcome = engine.handle_at("1", T0);
    assert!(outcome.is_match(), "{}", outcome);
    assert!(outcome
        .to_string()
        .starts_with("Camera 1: recording Front Door, found person (92%)"));

    let requests = server.requests();
    let detection = requests
        .iter()
        .find(|r| r.path == DETECTION_PATH)
        .expect("detection request");
    assert_eq!(detection.method, "POST");
    assert!(detection
        .header("content-type")
        .unwrap_or_default()
        .starts_with("multipart/form-data; boundary="));
    let body = String::from_utf8_lossy(&detection.body);
    assert!(body.contains("name=\"image\"; filename=\"snapshot.jpg\""));
    assert!(body.contains("Content-Type: image/jpeg"));
    let jpeg = test_jpeg();
    assert!(detection
        .body
        .windows(jpeg.len())
        .any(|window| window == jpeg.as_slice()));

    assert_eq!(server.count("/trigger/1"), 1);
    let accessory = requests.iter().find(|r| r.path == "/").expect("accessory");
    assert_eq!(
        accessory.query_param("accessoryId").as_deref(),
        Some("front-motion")
    );
    assert_eq!(accessory.query_param("state").as_deref(), Some("true"));

    let saved: Vec<_> = std::fs::read_dir(captures.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].ends_with("-camera-1-Front_Door.jpg"), "{}", saved[0]);
    let bytes = std::fs::read(captures.path().join(&saved[0])).unwrap();
    assert_eq!(&bytes[..2], b"\xff\xd8");

    // Within the interval nothing reaches the platform.
    let before = server.requests().len();
    assert!(matches!(
        engine.handle_at("1", T0 + 5),
        Outcome::Skipped { .. }
    ));
    assert_eq!(server.requests().len(), before);
}

#[test]
fn detection_client_maps_service_errors() {
    let server = StubServer::start(|_| StubResponse::status(500, "model not loaded"));
    let client = DeepstackClient::new(&server.url(), timeout()).unwrap();
    match client.detect(b"jpeg") {
        Err(DetectionError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "model not loaded");
        }
        other => panic!("unexpected: {:?}", other),
    }

    let server = StubServer::start(|_| StubResponse::json("not json"));
    let client = DeepstackClient::new(&server.url(), timeout()).unwrap();
    assert!(matches!(
        client.detect(b"jpeg"),
        Err(DetectionError::Malformed(_))
    ));

    let server = StubServer::start(|_| {
        StubResponse::json(r#"{"success":false,"error":"invalid image"}"#)
    });
    let client = DeepstackClient::new(&server.url(), timeout()).unwrap();
    assert!(matches!(
        client.detect(b"jpeg"),
        Err(DetectionError::Unsuccessful(_))
    ));

    let client = DeepstackClient::new(&closed_port_url(), timeout()).unwrap();
    assert!(matches!(
        client.detect(b"jpeg"),
        Err(DetectionError::Transport(_))
    ));
}

#[test]
fn detection_request_is_a_single_image_part() {
    let server =
        StubServer::start(|_| StubResponse::json(r#"{"success":true,"predictions":[]}"#));
    let client = DeepstackClient::new(&server.url(), timeout()).unwrap();
    let image: &[u8] = b"\xff\xd8raw-jpeg\xff\xd9";
    client.detect(image).unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.path, DETECTION_PATH);
    let content_type = request.header("content-type").unwrap_or_default();
    let boundary = content_type
        .strip_prefix("multipart/form-data; boundary=")
        .expect("multipart content type");
    assert_eq!(
        request.header("content-length"),
        Some(request.body.len().to_string().as_str())
    );

    let body = String::from_utf8_lossy(&request.body);
    assert!(body.starts_with(&format!("--{}\r\n", boundary)));
    assert!(body.trim_end().ends_with(&format!("--{}--", boundary)));
    assert_eq!(body.matches("Content-Disposition").count(), 1);
    assert!(request
        .body
        .windows(image.len())
        .any(|window| window == image));
}

#[test]
fn empty_prediction_list_is_a_valid_answer() {
    let server =
        StubServer::start(|_| StubResponse::json(r#"{"success":true,"predictions":[]}"#));
    let client = DeepstackClient::new(&server.url(), timeout()).unwrap();
    assert!(client.detect(b"jpeg").unwrap().is_empty());
}

#[test]
fn notifier_reports_status_and_transport_failures() {
    let server = StubServer::start(|req| match req.path.as_str() {
        "/ok" => StubResponse::ok("done"),
        _ => StubResponse::status(404, "missing"),
    });
    let notifier = HttpNotifier::new(timeout());
    assert!(notifier.trigger(&format!("{}/ok", server.url())).is_ok());
    assert!(matches!(
        notifier.trigger(&format!("{}/gone", server.url())),
        Err(NotifyError::Status { status: 404, .. })
    ));
    assert!(matches!(
        notifier.trigger(&closed_port_url()),
        Err(NotifyError::Transport { .. })
    ));
}
