// REST control plane and live stream endpoints.
//
// Parameter mutations post commands into the capture engine's mailbox and
// wait for its reply, so every change serializes through the producer
// thread. Sample and telemetry streams are chunked responses fed by
// dedicated ring-consumer threads.

use crate::capture::{EngineError, EngineHandle};
use crate::container::{self, AuxiInfo};
use crate::ring::IqRing;
use crate::sink::stream::{self, StreamFormat};
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::Router;
use chrono::Utc;
use std::convert::Infallible;
use std::io;
use tokio::net::ToSocketAddrs;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Chunks buffered per streaming client before back-pressure reaches the
/// pump thread (and, eventually, the ring's slip policy).
const STREAM_CHANNEL_DEPTH: usize = 8;

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub ring: IqRing,
    pub peak: broadcast::Sender<String>,
    pub power: broadcast::Sender<String>,
}

/// Parse the REST boolean vocabulary, case-insensitively:
/// {y, yes, true, 1} and {n, no, false, 0}.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" | "1" => Some(true),
        "n" | "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn fmt_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

fn yes_no(v: bool) -> &'static str {
    if v {
        "yes"
    } else {
        "no"
    }
}

fn bad_request(msg: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, msg.into()).into_response()
}

/// Await the engine's reply to a posted command.
async fn engine_reply<T>(rx: oneshot::Receiver<Result<T, EngineError>>) -> Result<T, Response> {
    match rx.await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(bad_request(e.to_string())),
        Err(_) => Err((StatusCode::SERVICE_UNAVAILABLE, "capture engine stopped").into_response()),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/quit", put(put_quit))
        .route("/rate", put(put_rate).get(get_rate))
        .route("/frequency", put(put_frequency).get(get_frequency))
        .route("/gain", put(put_gain).get(get_gain))
        .route("/agc", put(put_agc).get(get_agc))
        .route("/pause", put(put_pause).get(get_pause))
        .route("/setting", get(get_settings))
        .route("/setting/:name", put(put_setting).get(get_setting))
        .route("/peak", get(get_peak))
        .route("/power", get(get_power))
        .route("/pcm", get(get_pcm))
        .route("/s16", get(get_pcm))
        .route("/float", get(get_float))
        .route("/f32", get(get_float))
        .route("/cf32", get(get_cf32))
        .with_state(state)
}

/// Bind and serve until the shutdown flag flips.
pub async fn serve(
    addr: impl ToSocketAddrs,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    if let Ok(local) = listener.local_addr() {
        crate::info!("control server on http://{local}");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|quit| *quit).await;
        })
        .await
}

async fn put_quit(State(state): State<AppState>, body: String) -> Response {
    let Some(quit) = parse_bool(&body) else {
        return bad_request("expected a boolean");
    };
    if quit {
        crate::info!("shutdown requested over REST");
        state.engine.quit();
    }
    "OK".into_response()
}

async fn put_rate(State(state): State<AppState>, body: String) -> Response {
    let Ok(hz) = body.trim().parse::<f64>() else {
        return bad_request("expected a sample rate in Hz");
    };
    match engine_reply(state.engine.set_rate(hz)).await {
        Ok(()) => "OK".into_response(),
        Err(resp) => resp,
    }
}

async fn put_frequency(State(state): State<AppState>, body: String) -> Response {
    let Ok(hz) = body.trim().parse::<f64>() else {
        return bad_request("expected a frequency in Hz");
    };
    match engine_reply(state.engine.set_frequency(hz)).await {
        Ok(()) => "OK".into_response(),
        Err(resp) => resp,
    }
}

async fn put_gain(State(state): State<AppState>, body: String) -> Response {
    let Ok(db) = body.trim().parse::<f64>() else {
        return bad_request("expected a gain in dB");
    };
    match engine_reply(state.engine.set_gain(db)).await {
        Ok(()) => "OK".into_response(),
        Err(resp) => resp,
    }
}

async fn put_agc(State(state): State<AppState>, body: String) -> Response {
    let Some(on) = parse_bool(&body) else {
        return bad_request("expected a boolean");
    };
    match engine_reply(state.engine.set_agc(on)).await {
        Ok(()) => "OK".into_response(),
        Err(resp) => resp,
    }
}

async fn put_pause(State(state): State<AppState>, body: String) -> Response {
    let Some(paused) = parse_bool(&body) else {
        return bad_request("expected a boolean");
    };
    match engine_reply(state.engine.pause(paused)).await {
        Ok(()) => "OK".into_response(),
        Err(resp) => resp,
    }
}

async fn put_setting(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: String,
) -> Response {
    match engine_reply(state.engine.set_setting(name, body.trim().to_string())).await {
        Ok(()) => "OK".into_response(),
        Err(resp) => resp,
    }
}

async fn get_rate(State(state): State<AppState>) -> String {
    fmt_number(state.engine.snapshot().sample_rate_hz)
}

async fn get_frequency(State(state): State<AppState>) -> String {
    fmt_number(state.engine.snapshot().frequency_hz)
}

async fn get_gain(State(state): State<AppState>) -> String {
    fmt_number(state.engine.snapshot().gain_db)
}

async fn get_agc(State(state): State<AppState>) -> &'static str {
    yes_no(state.engine.snapshot().agc)
}

async fn get_pause(State(state): State<AppState>) -> &'static str {
    yes_no(!state.engine.snapshot().recording)
}

async fn get_settings(State(state): State<AppState>) -> Response {
    match engine_reply(state.engine.list_settings()).await {
        Ok(settings) => {
            let mut out = String::new();
            for (k, v) in settings {
                out.push_str(&format!("{k}: {v}\n"));
            }
            out.into_response()
        }
        Err(resp) => resp,
    }
}

async fn get_setting(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match engine_reply(state.engine.get_setting(name.clone())).await {
        Ok(value) => format!("{name}: {value}\n").into_response(),
        Err(resp) => resp,
    }
}

async fn get_peak(State(state): State<AppState>) -> Response {
    line_stream(&state.engine, &state.peak)
}

async fn get_power(State(state): State<AppState>) -> Response {
    line_stream(&state.engine, &state.power)
}

async fn get_pcm(State(state): State<AppState>) -> Response {
    sample_stream(&state, StreamFormat::WavS16)
}

async fn get_float(State(state): State<AppState>) -> Response {
    sample_stream(&state, StreamFormat::WavF32)
}

async fn get_cf32(State(state): State<AppState>) -> Response {
    sample_stream(&state, StreamFormat::Cf32)
}

fn not_live() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "capture not streaming yet").into_response()
}

/// Chunked text feed from a telemetry broadcast channel.
fn line_stream(engine: &EngineHandle, feed: &broadcast::Sender<String>) -> Response {
    if !engine.stats().is_live() {
        return not_live();
    }
    let rx = feed.subscribe();
    let body = Body::from_stream(futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(line) => {
                    return Some((Ok::<_, Infallible>(Bytes::from(line + "\n")), rx));
                }
                // A slow text reader just misses lines; keep going.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }));
    ([(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

/// Chunked sample stream: container header first, then converted chunks
/// pumped by a dedicated ring-consumer thread.
fn sample_stream(state: &AppState, format: StreamFormat) -> Response {
    if !state.engine.stats().is_live() {
        return not_live();
    }
    let params = state.engine.snapshot();
    let now = Utc::now();
    let header_bytes = match format {
        StreamFormat::Cf32 => Vec::new(),
        _ => container::stream_header(&AuxiInfo {
            start: now,
            center_freq_hz: params.frequency_hz.round() as u32,
            sample_rate_hz: params.sample_rate_hz.round() as u32,
            encoding: format.encoding(),
        }),
    };

    let (tx, rx) = mpsc::channel::<Vec<u8>>(STREAM_CHANNEL_DEPTH);
    stream::spawn(state.ring.subscribe(), format, header_bytes, tx);

    let body = Body::from_stream(futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<_, Infallible>(Bytes::from(chunk)), rx))
    }));
    let filename = format!(
        "{}_{}_{}.{}",
        params.frequency_hz.round() as u64,
        params.sample_rate_hz.round() as u64,
        now.format("%Y%m%d%H%M%S"),
        format.extension()
    );
    (
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
