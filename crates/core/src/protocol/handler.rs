use std::convert::Infallible;
use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::extract::multipart::MultipartError;
use axum::extract::{
    ConnectInfo, DefaultBodyLimit, FromRequest, Multipart, RawQuery, Request, State,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt as _;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::{HEALTH_PATH, VideoSource};
use crate::error::{GatewayError, Result};
use crate::protocol::multipart;
use crate::protocol::request::{ControlRequest, FirmwareUploadReport, OtaManifest};
use crate::server::AppState;
use crate::session::StreamSession;
use crate::transport::RelayedResponse;

/// Header carrying the uploaded file name to the device.
pub const FIRMWARE_FILENAME: HeaderName = HeaderName::from_static("x-firmware-filename");

/// Build the gateway's HTTP routes from the configured paths.
pub fn router(state: AppState) -> Router {
    let config = state.config.clone();
    let routes = &config.routes;

    Router::new()
        .route(&routes.status, get(status).fallback(method_not_allowed))
        .route(&routes.telemetry, get(telemetry).fallback(method_not_allowed))
        .route(&routes.control, post(control).fallback(method_not_allowed))
        .route(
            &routes.ota,
            post(ota)
                .fallback(method_not_allowed)
                .layer(DefaultBodyLimit::max(config.max_firmware_size)),
        )
        .route(&routes.infer, post(infer).fallback(method_not_allowed))
        .route(&routes.video, get(video).fallback(method_not_allowed))
        .route(&routes.sessions(), get(sessions).fallback(method_not_allowed))
        .route(&routes.snapshot(), get(snapshot).fallback(method_not_allowed))
        .route(HEALTH_PATH, get(healthz))
        .with_state(state)
}

async fn method_not_allowed() -> GatewayError {
    GatewayError::MethodNotAllowed
}

/// Extractor rejections keep their 413; everything else is a bad request.
fn rejected(status: StatusCode, text: String) -> GatewayError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        GatewayError::PayloadTooLarge(text)
    } else {
        GatewayError::BadRequest(text)
    }
}

async fn status(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<RelayedResponse> {
    state
        .upstream
        .get("status", &state.config.upstream.status, query.as_deref())
        .await
}

async fn telemetry(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<RelayedResponse> {
    state
        .upstream
        .get("telemetry", &state.config.upstream.telemetry, query.as_deref())
        .await
}

async fn control(State(state): State<AppState>, body: Bytes) -> Result<RelayedResponse> {
    let request = ControlRequest::parse(&body)?;
    tracing::info!(command = %request.command, "relaying control command");

    let body = serde_json::to_vec(&request).map_err(std::io::Error::other)?;
    state
        .upstream
        .post(
            "control",
            &state.config.upstream.control,
            HeaderValue::from_static("application/json"),
            HeaderMap::new(),
            body.into(),
        )
        .await
}

/// Firmware update: a JSON manifest, a raw image, or a multipart upload.
async fn ota(State(state): State<AppState>, request: Request) -> Result<Response> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| rejected(e.status(), e.body_text()))?;
        let (filename, firmware) = read_firmware_part(multipart).await?;
        return upload_firmware(&state, firmware, filename).await;
    }

    let body = Bytes::from_request(request, &state)
        .await
        .map_err(|e| rejected(e.status(), e.body_text()))?;

    if content_type.starts_with("application/json") {
        let (manifest, _) = OtaManifest::parse(&body)?;
        tracing::info!(
            version = %manifest.version,
            url = %manifest.url,
            "relaying OTA manifest"
        );
        let relayed = state
            .upstream
            .post(
                "ota",
                &state.config.upstream.ota,
                HeaderValue::from_static("application/json"),
                HeaderMap::new(),
                body,
            )
            .await?;
        return Ok(relayed.into_response());
    }

    if body.is_empty() {
        return Err(GatewayError::BadRequest("firmware body is empty".to_string()));
    }
    upload_firmware(&state, body, None).await
}

/// Pick the `file` part, or failing that the first part carrying a file name.
async fn read_firmware_part(mut multipart: Multipart) -> Result<(Option<String>, Bytes)> {
    let bad = |e: MultipartError| rejected(e.status(), e.body_text());
    let mut chosen = None;

    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let named_file = field.name() == Some("file");
        if !named_file && (chosen.is_some() || field.file_name().is_none()) {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        chosen = Some((filename, field.bytes().await.map_err(bad)?));
        if named_file {
            break;
        }
    }

    match chosen {
        Some((_, data)) if data.is_empty() => Err(GatewayError::BadRequest(
            "firmware file part is empty".to_string(),
        )),
        Some(part) => Ok(part),
        None => Err(GatewayError::BadRequest(
            "multipart body has no firmware file part".to_string(),
        )),
    }
}

async fn upload_firmware(
    state: &AppState,
    firmware: Bytes,
    filename: Option<String>,
) -> Result<Response> {
    let mut headers = HeaderMap::new();
    if let Some(value) = filename.as_deref().and_then(|f| HeaderValue::from_str(f).ok()) {
        headers.insert(FIRMWARE_FILENAME, value);
    }

    let size = firmware.len();
    tracing::info!(size, filename = ?filename, "relaying firmware image");
    let relayed = state
        .upstream
        .post(
            "ota",
            &state.config.upstream.ota,
            HeaderValue::from_static("application/octet-stream"),
            headers,
            firmware,
        )
        .await?;

    let report = FirmwareUploadReport {
        size,
        filename,
        device_status: relayed.status.as_u16(),
        device_response: relayed.body_json(),
    };
    Ok((relayed.status, Json(report)).into_response())
}

/// Inference trigger: the caller's body and content type go through as-is.
async fn infer(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<RelayedResponse> {
    let endpoint = state
        .config
        .upstream
        .infer
        .as_ref()
        .ok_or(GatewayError::EndpointNotConfigured { endpoint: "infer" })?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));

    tracing::info!(bytes = body.len(), "relaying inference request");
    state
        .upstream
        .post("infer", endpoint, content_type, HeaderMap::new(), body)
        .await
}

async fn video(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<Response> {
    match &state.config.video.source {
        VideoSource::Udp { .. } => Ok(live_stream(&state, peer)),
        VideoSource::Http { url, api_key, .. } => {
            let upstream = state.upstream.open_stream(url, api_key.as_deref()).await?;
            tracing::info!(%peer, "video pass-through opened");

            let mut headers = HeaderMap::new();
            if let Some(content_type) = upstream.headers().get(header::CONTENT_TYPE) {
                headers.insert(header::CONTENT_TYPE, content_type.clone());
            }
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

            // Dropping the body (client gone) drops the upstream request.
            let stream = upstream
                .bytes_stream()
                .take_until(state.shutdown.clone().cancelled_owned());
            Ok((headers, Body::from_stream(stream)).into_response())
        }
        VideoSource::Disabled => Err(GatewayError::VideoUnavailable),
    }
}

fn live_stream(state: &AppState, peer: SocketAddr) -> Response {
    let session = state.sessions.create_session(&peer.to_string());
    let (rx, _task) = StreamSession::new(
        session,
        state.register.clone(),
        state.config.video.stream.clone(),
        state.shutdown.clone(),
    )
    .spawn();

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    (multipart::stream_headers(), body).into_response()
}

/// One still image: the held frame in live mode, the device's in pass-through.
async fn snapshot(State(state): State<AppState>) -> Result<Response> {
    let (content_type, image) = match &state.config.video.source {
        VideoSource::Udp { .. } => {
            let frame = state.register.snapshot().ok_or(GatewayError::NoFrame)?;
            (HeaderValue::from_static("image/jpeg"), frame.payload().clone())
        }
        VideoSource::Http {
            api_key,
            snapshot: Some(endpoint),
            ..
        } => {
            let relayed = state
                .upstream
                .fetch_snapshot(endpoint, api_key.as_deref())
                .await?;
            let content_type = relayed
                .headers
                .get(header::CONTENT_TYPE)
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static("image/jpeg"));
            (content_type, relayed.body)
        }
        VideoSource::Http { snapshot: None, .. } => {
            return Err(GatewayError::EndpointNotConfigured {
                endpoint: "snapshot",
            });
        }
        VideoSource::Disabled => return Err(GatewayError::VideoUnavailable),
    };

    let headers = [
        (header::CONTENT_TYPE, content_type),
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
    ];
    Ok((headers, image).into_response())
}

async fn sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sessions.list())
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let status = if state.health.is_failed() { "degraded" } else { "ok" };

    Json(serde_json::json!({
        "status": status,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "video": {
            "mode": state.config.video.source.mode(),
            "source": state.health.get(),
            "last_sequence": state.register.last_sequence(),
            "active_sessions": state.sessions.len(),
        },
        "device_ports": state.config.device_ports,
    }))
}
