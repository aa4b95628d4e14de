use super::*;
use crate::capture::{spawn as spawn_engine, CaptureConfig};
use crate::device::SimDevice;
use crate::sink::file::FileCommand;
use axum::body::to_bytes;
use axum::http::{Method, Request, StatusCode};
use futures_util::StreamExt;
use std::sync::mpsc::Receiver;
use std::time::Duration;
use tower::ServiceExt;

struct Rig {
    state: AppState,
    // Held open so the engine can open sessions; never drained.
    _file_rx: Receiver<FileCommand>,
}

impl Rig {
    fn new(start_recording: bool) -> Self {
        let ring = crate::ring::IqRing::new(1 << 16, 2048).unwrap();
        let (file_tx, file_rx) = std::sync::mpsc::channel();
        let device = Box::new(SimDevice::unpaced(1e6, None));
        let (engine, _thread) = spawn_engine(
            device,
            ring.clone(),
            file_tx,
            CaptureConfig {
                frequency_hz: 100e6,
                sample_rate_hz: 1e6,
                gain_db: 12.0,
                agc: false,
                settings: vec![],
                packet_size: 256,
                start_recording,
            },
        )
        .unwrap();
        let (peak, _) = broadcast::channel(16);
        let (power, _) = broadcast::channel(16);
        Rig {
            state: AppState {
                engine,
                ring,
                peak,
                power,
            },
            _file_rx: file_rx,
        }
    }

    fn app(&self) -> Router {
        router(self.state.clone())
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.state.engine.quit();
    }
}

async fn request(app: Router, method: Method, path: &str, body: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(path)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

#[test]
fn test_parse_bool_vocabulary() {
    for s in ["y", "yes", "true", "1", "Y", "YES", "True", " yes "] {
        assert_eq!(parse_bool(s), Some(true), "{s}");
    }
    for s in ["n", "no", "false", "0", "N", "NO", "False"] {
        assert_eq!(parse_bool(s), Some(false), "{s}");
    }
    for s in ["", "maybe", "2", "on", "off", "yess"] {
        assert_eq!(parse_bool(s), None, "{s}");
    }
}

#[test]
fn test_fmt_number_integer_vs_float() {
    assert_eq!(fmt_number(1_000_000.0), "1000000");
    assert_eq!(fmt_number(100.1e6), "100100000");
    assert_eq!(fmt_number(42.5), "42.5");
}

#[tokio::test]
async fn test_get_parameters() {
    let rig = Rig::new(false);
    let (status, body) = request(rig.app(), Method::GET, "/rate", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "1000000");

    let (_, body) = request(rig.app(), Method::GET, "/frequency", "").await;
    assert_eq!(body, "100000000");

    let (_, body) = request(rig.app(), Method::GET, "/gain", "").await;
    assert_eq!(body, "12");

    let (_, body) = request(rig.app(), Method::GET, "/agc", "").await;
    assert_eq!(body, "no");

    let (_, body) = request(rig.app(), Method::GET, "/pause", "").await;
    assert_eq!(body, "yes");
}

#[tokio::test]
async fn test_put_frequency_applies() {
    let rig = Rig::new(false);
    let (status, body) = request(rig.app(), Method::PUT, "/frequency", "101500000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");

    let (_, body) = request(rig.app(), Method::GET, "/frequency", "").await;
    assert_eq!(body, "101500000");
}

#[tokio::test]
async fn test_put_rate_rejected_while_recording() {
    let rig = Rig::new(true);
    let (status, body) = request(rig.app(), Method::PUT, "/rate", "2e6").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("pause"), "message should point at /pause: {body}");

    // Unchanged state, then the pause/rate/unpause dance succeeds.
    let (_, body) = request(rig.app(), Method::GET, "/rate", "").await;
    assert_eq!(body, "1000000");

    let (status, _) = request(rig.app(), Method::PUT, "/pause", "y").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(rig.app(), Method::PUT, "/rate", "2e6").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(rig.app(), Method::PUT, "/pause", "n").await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = request(rig.app(), Method::GET, "/rate", "").await;
    assert_eq!(body, "2000000");
}

#[tokio::test]
async fn test_malformed_bodies_are_400() {
    let rig = Rig::new(false);
    for (path, body) in [("/rate", "fast"), ("/frequency", ""), ("/agc", "maybe"), ("/pause", "2")] {
        let (status, _) = request(rig.app(), Method::PUT, path, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{path} {body:?}");
    }
}

#[tokio::test]
async fn test_unknown_path_is_404_and_method_mismatch_405() {
    let rig = Rig::new(false);
    let (status, _) = request(rig.app(), Method::GET, "/nope", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(rig.app(), Method::GET, "/quit", "").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let (status, _) = request(rig.app(), Method::PUT, "/peak", "y").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_settings_endpoints() {
    let rig = Rig::new(false);
    let (status, body) = request(rig.app(), Method::PUT, "/setting/biastee", "true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");

    let (status, body) = request(rig.app(), Method::GET, "/setting/biastee", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "biastee: true\n");

    let (status, body) = request(rig.app(), Method::GET, "/setting", "").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("biastee: true\n"));

    let (status, _) = request(rig.app(), Method::GET, "/setting/unknown", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_quit_requires_boolean() {
    let rig = Rig::new(false);
    let (status, _) = request(rig.app(), Method::PUT, "/quit", "shutdown").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = request(rig.app(), Method::PUT, "/quit", "n").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn test_stream_endpoints_503_after_shutdown() {
    let rig = Rig::new(false);
    rig.state.engine.quit();
    // Wait for the engine to tear down and clear the live flag.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while rig.state.engine.stats().is_live() && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    for path in ["/float", "/pcm", "/cf32", "/peak", "/power"] {
        let (status, _) = request(rig.app(), Method::GET, path, "").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{path}");
    }
}

#[tokio::test]
async fn test_float_stream_starts_with_streaming_wav_header() {
    let rig = Rig::new(false);
    // Wait until the first frame has been committed.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !rig.state.engine.stats().is_live() && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let response = rig
        .app()
        .oneshot(Request::builder().uri("/float").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "audio/wav"
    );
    let disposition = response.headers()["content-disposition"].to_str().unwrap().to_string();
    assert!(disposition.starts_with("inline; filename=\"100000000_1000000_"));
    assert!(disposition.ends_with(".wav\""));

    let mut stream = response.into_body().into_data_stream();
    let first = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("a header chunk must arrive promptly")
        .unwrap()
        .unwrap();
    assert_eq!(&first[0..4], b"RIFF");
    assert_eq!(&first[4..8], &0xFFFF_FFFFu32.to_le_bytes());
    assert_eq!(&first[8..12], b"WAVE");
}

#[tokio::test]
async fn test_peak_stream_forwards_feed_lines() {
    let rig = Rig::new(false);
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !rig.state.engine.stats().is_live() && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let response = rig
        .app()
        .oneshot(Request::builder().uri("/peak").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/plain"
    );

    let mut stream = response.into_body().into_data_stream();
    rig.state.peak.send("-6.0 dBFS".to_string()).unwrap();
    let first = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("line must arrive")
        .unwrap()
        .unwrap();
    assert_eq!(&first[..], b"-6.0 dBFS\n");
}
