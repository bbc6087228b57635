//! Gateway configuration.
//!
//! All settings are environment-style `KEY=value` pairs read exactly once
//! at startup into an immutable [`GatewayConfig`]. Components receive the
//! config (or the part of it they need) explicitly; nothing below this
//! module looks at the process environment.
//!
//! | Key | Default |
//! |-----|---------|
//! | `SERVER_HOST` / `SERVER_PORT` | `0.0.0.0` / `8080` |
//! | `DEVICE_API_BASE` | none; derives unset `*_API` endpoints |
//! | `DEVICE_API_TOKEN` | none; bearer credential for upstream calls |
//! | `STATUS_API`, `TELEMETRY_API`, `CONTROL_API`, `OTA_API` | `{DEVICE_API_BASE}/api/v1/<name>` |
//! | `INFER_API` | `{DEVICE_API_BASE}/api/v1/infer`, optional |
//! | `*_PATH` | `/status`, `/telemetry`, `/control`, `/ota`, `/infer`, `/video` |
//! | `*_TIMEOUT_SECS` | status/telemetry 5, control 10, ota/infer 30 |
//! | `OTA_MAX_BYTES` | 256 MiB |
//! | `VIDEO_PROTOCOL` | inferred: `udp`, `http` or `none` |
//! | `VIDEO_STREAM_ADDR` / `VIDEO_STREAM_PORT` | `0.0.0.0` / none |
//! | `VIDEO_API_URL` / `VIDEO_API_KEY` | none / `DEVICE_API_TOKEN` |
//! | `VIDEO_SNAPSHOT_URL` / `VIDEO_SNAPSHOT_TIMEOUT_SECS` | none / 10 |
//! | `VIDEO_INTERVAL_MS` | `40` (~25 fps) |
//! | `VIDEO_STALE_TIMEOUT_MS` | none (freeze-frame) |
//! | `VIDEO_MAX_FRAMES`, `VIDEO_MAX_DURATION_SECS` | none |
//! | `MQTT_PORT`, `MODBUS_PORT`, `S7_PORT` | none |
//!
//! Every inbound route, including the derived `{VIDEO_PATH}/sessions`,
//! `{VIDEO_PATH}/snapshot` and the fixed `/healthz`, must be distinct.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;
use serde::Serialize;

use crate::error::ConfigError;

pub const DEFAULT_SERVER_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_VIDEO_INTERVAL: Duration = Duration::from_millis(40);
pub const DEFAULT_MAX_FIRMWARE_SIZE: usize = 256 * 1024 * 1024;

/// Fixed liveness route; not configurable.
pub const HEALTH_PATH: &str = "/healthz";

/// A single upstream device endpoint and the timeout applied to calls to it.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: Url,
    pub timeout: Duration,
}

/// Upstream endpoints for the request/response relays.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub status: Endpoint,
    pub telemetry: Endpoint,
    pub control: Endpoint,
    pub ota: Endpoint,
    /// Inference trigger; `None` when neither `INFER_API` nor a base is set.
    pub infer: Option<Endpoint>,
    /// Bearer credential attached to every relayed call.
    pub token: Option<String>,
}

/// Inbound route paths served by the gateway.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub status: String,
    pub telemetry: String,
    pub control: String,
    pub ota: String,
    pub infer: String,
    pub video: String,
}

impl RouteConfig {
    /// Listing of active live-video sessions.
    pub fn sessions(&self) -> String {
        format!("{}/sessions", self.video.trim_end_matches('/'))
    }

    /// Single still image from the live feed.
    pub fn snapshot(&self) -> String {
        format!("{}/snapshot", self.video.trim_end_matches('/'))
    }

    /// Two routes on the same path cannot both be served.
    fn check_distinct(&self) -> Result<(), ConfigError> {
        let routes = [
            ("STATUS_PATH", self.status.clone()),
            ("TELEMETRY_PATH", self.telemetry.clone()),
            ("CONTROL_PATH", self.control.clone()),
            ("OTA_PATH", self.ota.clone()),
            ("INFER_PATH", self.infer.clone()),
            ("VIDEO_PATH", self.video.clone()),
            ("VIDEO_PATH", self.sessions()),
            ("VIDEO_PATH", self.snapshot()),
        ];

        let mut taken: HashMap<String, &'static str> = HashMap::new();
        taken.insert(HEALTH_PATH.to_string(), "the health route");
        for (key, path) in routes {
            if let Some(owner) = taken.get(&path) {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("route {path} is already used by {owner}"),
                    value: path,
                });
            }
            taken.insert(path, key);
        }
        Ok(())
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            status: "/status".to_string(),
            telemetry: "/telemetry".to_string(),
            control: "/control".to_string(),
            ota: "/ota".to_string(),
            infer: "/infer".to_string(),
            video: "/video".to_string(),
        }
    }
}

/// Where live frames come from.
#[derive(Debug, Clone)]
pub enum VideoSource {
    /// One JPEG per datagram, received on a local socket.
    Udp { bind: SocketAddr },
    /// The device already serves a multipart feed; copy it through per request.
    /// `snapshot` is the device's still-image URL, if it has one.
    Http {
        url: Url,
        api_key: Option<String>,
        snapshot: Option<Endpoint>,
    },
    /// No video configured.
    Disabled,
}

impl VideoSource {
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Udp { .. } => "udp",
            Self::Http { .. } => "http",
            Self::Disabled => "none",
        }
    }
}

/// What a streaming session does once the register stops advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// Keep re-sending the last frame for as long as the client stays.
    FreezeFrame,
    /// Stop writing once the held frame is older than the given age.
    /// Writing resumes as soon as a fresh frame arrives.
    StopAfter(Duration),
}

/// Per-session pacing and limits for the live relay.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Cadence between chunk writes.
    pub interval: Duration,
    pub stale: StalePolicy,
    /// End the session after this many chunks.
    pub max_frames: Option<u64>,
    /// End the session after this long.
    pub max_duration: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_VIDEO_INTERVAL,
            stale: StalePolicy::FreezeFrame,
            max_frames: None,
            max_duration: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoConfig {
    pub source: VideoSource,
    pub stream: StreamConfig,
}

/// Device-side protocol ports that are acknowledged but not served.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DevicePorts {
    pub mqtt: Option<u16>,
    pub modbus: Option<u16>,
    pub s7: Option<u16>,
}

/// Immutable gateway configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind: SocketAddr,
    pub routes: RouteConfig,
    pub upstream: UpstreamConfig,
    pub video: VideoConfig,
    pub device_ports: DevicePorts,
    /// Largest request body accepted on the OTA route.
    pub max_firmware_size: usize,
}

impl GatewayConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let settings = Settings::new(lookup);

        let host: IpAddr = settings.parse_or("SERVER_HOST", DEFAULT_SERVER_HOST)?;
        let port: u16 = settings.parse_or("SERVER_PORT", DEFAULT_SERVER_PORT)?;

        let token = settings.get("DEVICE_API_TOKEN");
        let base = settings.url("DEVICE_API_BASE")?;

        let upstream = UpstreamConfig {
            status: settings.endpoint("STATUS", base.as_ref(), "status", 5)?,
            telemetry: settings.endpoint("TELEMETRY", base.as_ref(), "telemetry", 5)?,
            control: settings.endpoint("CONTROL", base.as_ref(), "control", 10)?,
            ota: settings.endpoint("OTA", base.as_ref(), "ota", 30)?,
            infer: settings.optional_endpoint("INFER", base.as_ref(), "infer", 30)?,
            token: token.clone(),
        };

        let defaults = RouteConfig::default();
        let routes = RouteConfig {
            status: settings.path_or("STATUS_PATH", defaults.status)?,
            telemetry: settings.path_or("TELEMETRY_PATH", defaults.telemetry)?,
            control: settings.path_or("CONTROL_PATH", defaults.control)?,
            ota: settings.path_or("OTA_PATH", defaults.ota)?,
            infer: settings.path_or("INFER_PATH", defaults.infer)?,
            video: settings.path_or("VIDEO_PATH", defaults.video)?,
        };
        routes.check_distinct()?;

        let video = VideoConfig {
            source: settings.video_source(token)?,
            stream: settings.stream()?,
        };

        let device_ports = DevicePorts {
            mqtt: settings.parse_opt("MQTT_PORT")?,
            modbus: settings.parse_opt("MODBUS_PORT")?,
            s7: settings.parse_opt("S7_PORT")?,
        };

        let max_firmware_size = settings.parse_or("OTA_MAX_BYTES", DEFAULT_MAX_FIRMWARE_SIZE)?;
        if max_firmware_size == 0 {
            return Err(ConfigError::Invalid {
                key: "OTA_MAX_BYTES",
                value: "0".to_string(),
                reason: "limit must be at least 1 byte".to_string(),
            });
        }

        Ok(Self {
            bind: SocketAddr::new(host, port),
            routes,
            upstream,
            video,
            device_ports,
            max_firmware_size,
        })
    }

    /// Override the HTTP bind address (used by the CLI `--bind` flag).
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }
}

/// Snapshot of the raw key/value settings with typed accessors.
struct Settings {
    values: HashMap<&'static str, String>,
}

const KEYS: &[&str] = &[
    "SERVER_HOST",
    "SERVER_PORT",
    "DEVICE_API_BASE",
    "DEVICE_API_TOKEN",
    "STATUS_API",
    "TELEMETRY_API",
    "CONTROL_API",
    "OTA_API",
    "INFER_API",
    "STATUS_PATH",
    "TELEMETRY_PATH",
    "CONTROL_PATH",
    "OTA_PATH",
    "INFER_PATH",
    "VIDEO_PATH",
    "STATUS_TIMEOUT_SECS",
    "TELEMETRY_TIMEOUT_SECS",
    "CONTROL_TIMEOUT_SECS",
    "OTA_TIMEOUT_SECS",
    "INFER_TIMEOUT_SECS",
    "OTA_MAX_BYTES",
    "VIDEO_PROTOCOL",
    "VIDEO_STREAM_ADDR",
    "VIDEO_STREAM_PORT",
    "VIDEO_API_URL",
    "VIDEO_API_KEY",
    "VIDEO_SNAPSHOT_URL",
    "VIDEO_SNAPSHOT_TIMEOUT_SECS",
    "VIDEO_INTERVAL_MS",
    "VIDEO_STALE_TIMEOUT_MS",
    "VIDEO_MAX_FRAMES",
    "VIDEO_MAX_DURATION_SECS",
    "MQTT_PORT",
    "MODBUS_PORT",
    "S7_PORT",
];

impl Settings {
    fn new<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let values = KEYS
            .iter()
            .filter_map(|key| {
                let value = lookup(key)?;
                let value = value.trim();
                (!value.is_empty()).then(|| (*key, value.to_string()))
            })
            .collect();
        Self { values }
    }

    fn get(&self, key: &'static str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn parse_opt<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.values
            .get(key)
            .map(|value| {
                value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    key,
                    value: value.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.parse_opt(key)?.unwrap_or(default))
    }

    fn url(&self, key: &'static str) -> Result<Option<Url>, ConfigError> {
        self.parse_opt(key)
    }

    fn path_or(&self, key: &'static str, default: String) -> Result<String, ConfigError> {
        match self.values.get(key) {
            None => Ok(default),
            Some(path) if !path.starts_with('/') => Err(ConfigError::Invalid {
                key,
                value: path.clone(),
                reason: "route paths must start with '/'".to_string(),
            }),
            Some(path) if path.contains(['{', '}', '*']) => Err(ConfigError::Invalid {
                key,
                value: path.clone(),
                reason: "route paths must be literal".to_string(),
            }),
            Some(path) => Ok(path.clone()),
        }
    }

    /// A relay endpoint named by `prefix`: `{prefix}_API` or derived from
    /// the base, with its timeout from `{prefix}_TIMEOUT_SECS`.
    fn endpoint(
        &self,
        prefix: &'static str,
        base: Option<&Url>,
        name: &'static str,
        default_timeout_secs: u64,
    ) -> Result<Endpoint, ConfigError> {
        self.optional_endpoint(prefix, base, name, default_timeout_secs)?
            .ok_or(ConfigError::Missing {
                key: api_key(prefix),
            })
    }

    fn optional_endpoint(
        &self,
        prefix: &'static str,
        base: Option<&Url>,
        name: &'static str,
        default_timeout_secs: u64,
    ) -> Result<Option<Endpoint>, ConfigError> {
        let url = match (self.url(api_key(prefix))?, base) {
            (Some(url), _) => url,
            (None, Some(base)) => {
                derive_endpoint(base, name).map_err(|reason| ConfigError::Invalid {
                    key: "DEVICE_API_BASE",
                    value: base.to_string(),
                    reason,
                })?
            }
            (None, None) => return Ok(None),
        };
        let timeout = self.timeout(timeout_key(prefix), default_timeout_secs)?;
        Ok(Some(Endpoint { url, timeout }))
    }

    /// A whole-second timeout; zero would fail every call.
    fn timeout(&self, key: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
        match self.parse_or(key, default_secs)? {
            0 => Err(ConfigError::Invalid {
                key,
                value: "0".to_string(),
                reason: "timeout must be at least 1s".to_string(),
            }),
            secs => Ok(Duration::from_secs(secs)),
        }
    }

    fn video_source(&self, token: Option<String>) -> Result<VideoSource, ConfigError> {
        let protocol = match self.values.get("VIDEO_PROTOCOL") {
            Some(p) => p.to_ascii_lowercase(),
            None if self.values.contains_key("VIDEO_STREAM_PORT") => "udp".to_string(),
            None if self.values.contains_key("VIDEO_API_URL") => "http".to_string(),
            None => "none".to_string(),
        };

        match protocol.as_str() {
            "udp" => {
                let host: IpAddr = self.parse_or("VIDEO_STREAM_ADDR", DEFAULT_SERVER_HOST)?;
                let port: u16 = self
                    .parse_opt("VIDEO_STREAM_PORT")?
                    .ok_or(ConfigError::Missing { key: "VIDEO_STREAM_PORT" })?;
                Ok(VideoSource::Udp {
                    bind: SocketAddr::new(host, port),
                })
            }
            "http" => {
                let url = self
                    .url("VIDEO_API_URL")?
                    .ok_or(ConfigError::Missing { key: "VIDEO_API_URL" })?;
                let snapshot = match self.url("VIDEO_SNAPSHOT_URL")? {
                    Some(url) => Some(Endpoint {
                        url,
                        timeout: self.timeout("VIDEO_SNAPSHOT_TIMEOUT_SECS", 10)?,
                    }),
                    None => None,
                };
                Ok(VideoSource::Http {
                    url,
                    api_key: self.get("VIDEO_API_KEY").or(token),
                    snapshot,
                })
            }
            "none" | "disabled" => Ok(VideoSource::Disabled),
            other => Err(ConfigError::Invalid {
                key: "VIDEO_PROTOCOL",
                value: other.to_string(),
                reason: "expected one of udp, http, none".to_string(),
            }),
        }
    }

    fn stream(&self) -> Result<StreamConfig, ConfigError> {
        let default_ms = DEFAULT_VIDEO_INTERVAL.as_millis() as u64;
        let interval_ms: u64 = self.parse_or("VIDEO_INTERVAL_MS", default_ms)?;
        if interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "VIDEO_INTERVAL_MS",
                value: "0".to_string(),
                reason: "cadence must be at least 1ms".to_string(),
            });
        }

        let stale = match self.parse_opt::<u64>("VIDEO_STALE_TIMEOUT_MS")? {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    key: "VIDEO_STALE_TIMEOUT_MS",
                    value: "0".to_string(),
                    reason: "every frame would be stale; unset it for freeze-frame".to_string(),
                });
            }
            Some(ms) => StalePolicy::StopAfter(Duration::from_millis(ms)),
            None => StalePolicy::FreezeFrame,
        };

        Ok(StreamConfig {
            interval: Duration::from_millis(interval_ms),
            stale,
            max_frames: self.parse_opt("VIDEO_MAX_FRAMES")?,
            max_duration: self
                .parse_opt::<u64>("VIDEO_MAX_DURATION_SECS")?
                .map(Duration::from_secs),
        })
    }
}

fn api_key(prefix: &'static str) -> &'static str {
    match prefix {
        "STATUS" => "STATUS_API",
        "TELEMETRY" => "TELEMETRY_API",
        "CONTROL" => "CONTROL_API",
        "OTA" => "OTA_API",
        _ => "INFER_API",
    }
}

fn timeout_key(prefix: &'static str) -> &'static str {
    match prefix {
        "STATUS" => "STATUS_TIMEOUT_SECS",
        "TELEMETRY" => "TELEMETRY_TIMEOUT_SECS",
        "CONTROL" => "CONTROL_TIMEOUT_SECS",
        "OTA" => "OTA_TIMEOUT_SECS",
        _ => "INFER_TIMEOUT_SECS",
    }
}

/// `http://dev:8080` + `status` → `http://dev:8080/api/v1/status`.
///
/// A base that already carries a path keeps it:
/// `http://dev/gw/` + `ota` → `http://dev/gw/api/v1/ota`.
fn derive_endpoint(base: &Url, name: &str) -> Result<Url, String> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| "base URL cannot carry a path".to_string())?
        .pop_if_empty()
        .extend(["api", "v1", name]);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<GatewayConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_with_device_base() {
        let cfg = config(&[("DEVICE_API_BASE", "http://10.0.0.5:8080")]).unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(
            cfg.upstream.status.url.as_str(),
            "http://10.0.0.5:8080/api/v1/status"
        );
        assert_eq!(cfg.upstream.status.timeout, Duration::from_secs(5));
        assert_eq!(cfg.upstream.ota.timeout, Duration::from_secs(30));
        assert_eq!(cfg.routes.video, "/video");
        assert!(matches!(cfg.video.source, VideoSource::Disabled));
        assert_eq!(cfg.video.stream.interval, Duration::from_millis(40));
        assert_eq!(cfg.video.stream.stale, StalePolicy::FreezeFrame);
    }

    #[test]
    fn base_with_path_is_extended() {
        let cfg = config(&[("DEVICE_API_BASE", "http://dev/gw/")]).unwrap();
        assert_eq!(cfg.upstream.ota.url.as_str(), "http://dev/gw/api/v1/ota");
    }

    #[test]
    fn explicit_endpoint_overrides_base() {
        let cfg = config(&[
            ("DEVICE_API_BASE", "http://dev"),
            ("CONTROL_API", "http://other:9000/cmd"),
        ])
        .unwrap();
        assert_eq!(cfg.upstream.control.url.as_str(), "http://other:9000/cmd");
        assert_eq!(cfg.upstream.status.url.as_str(), "http://dev/api/v1/status");
    }

    #[test]
    fn missing_endpoint_is_fatal() {
        let err = config(&[
            ("STATUS_API", "http://dev/s"),
            ("TELEMETRY_API", "http://dev/t"),
            ("CONTROL_API", "http://dev/c"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "OTA_API" }));
    }

    #[test]
    fn empty_value_counts_as_unset() {
        let err = config(&[("DEVICE_API_BASE", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "STATUS_API" }));
    }

    #[test]
    fn udp_inferred_from_port() {
        let cfg = config(&[
            ("DEVICE_API_BASE", "http://dev"),
            ("VIDEO_STREAM_PORT", "5600"),
        ])
        .unwrap();
        match cfg.video.source {
            VideoSource::Udp { bind } => assert_eq!(bind, "0.0.0.0:5600".parse().unwrap()),
            other => panic!("expected udp source, got {other:?}"),
        }
    }

    #[test]
    fn http_video_falls_back_to_device_token() {
        let cfg = config(&[
            ("DEVICE_API_BASE", "http://dev"),
            ("DEVICE_API_TOKEN", "secret"),
            ("VIDEO_API_URL", "http://cam/stream.mjpg"),
        ])
        .unwrap();
        match cfg.video.source {
            VideoSource::Http {
                url,
                api_key,
                snapshot,
            } => {
                assert_eq!(url.as_str(), "http://cam/stream.mjpg");
                assert_eq!(api_key.as_deref(), Some("secret"));
                assert!(snapshot.is_none());
            }
            other => panic!("expected http source, got {other:?}"),
        }
    }

    #[test]
    fn udp_without_port_is_fatal() {
        let err = config(&[("DEVICE_API_BASE", "http://dev"), ("VIDEO_PROTOCOL", "udp")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "VIDEO_STREAM_PORT" }));
    }

    #[test]
    fn unknown_video_protocol_is_rejected() {
        let err = config(&[("DEVICE_API_BASE", "http://dev"), ("VIDEO_PROTOCOL", "rtsp")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "VIDEO_PROTOCOL", .. }));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = config(&[("DEVICE_API_BASE", "http://dev"), ("SERVER_PORT", "eighty")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "SERVER_PORT", .. }));
    }

    #[test]
    fn stream_limits_and_stale_policy() {
        let cfg = config(&[
            ("DEVICE_API_BASE", "http://dev"),
            ("VIDEO_INTERVAL_MS", "100"),
            ("VIDEO_STALE_TIMEOUT_MS", "2000"),
            ("VIDEO_MAX_FRAMES", "50"),
            ("VIDEO_MAX_DURATION_SECS", "60"),
        ])
        .unwrap();
        let stream = cfg.video.stream;
        assert_eq!(stream.interval, Duration::from_millis(100));
        assert_eq!(stream.stale, StalePolicy::StopAfter(Duration::from_secs(2)));
        assert_eq!(stream.max_frames, Some(50));
        assert_eq!(stream.max_duration, Some(Duration::from_secs(60)));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = config(&[("DEVICE_API_BASE", "http://dev"), ("VIDEO_INTERVAL_MS", "0")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "VIDEO_INTERVAL_MS", .. }));
    }

    #[test]
    fn route_paths_must_be_absolute() {
        let err = config(&[("DEVICE_API_BASE", "http://dev"), ("VIDEO_PATH", "video")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "VIDEO_PATH", .. }));
    }

    #[test]
    fn route_paths_must_be_literal() {
        let err = config(&[("DEVICE_API_BASE", "http://dev"), ("STATUS_PATH", "/status/{id}")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "STATUS_PATH", .. }));
    }

    #[test]
    fn colliding_routes_are_rejected() {
        let err = config(&[("DEVICE_API_BASE", "http://dev"), ("VIDEO_PATH", "/status")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "VIDEO_PATH", .. }));

        let err = config(&[("DEVICE_API_BASE", "http://dev"), ("STATUS_PATH", "/healthz")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "STATUS_PATH", .. }));

        let err = config(&[
            ("DEVICE_API_BASE", "http://dev"),
            ("TELEMETRY_PATH", "/video/sessions"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "VIDEO_PATH", .. }));
    }

    #[test]
    fn derived_video_routes_follow_video_path() {
        let cfg = config(&[("DEVICE_API_BASE", "http://dev"), ("VIDEO_PATH", "/cam/")]).unwrap();
        assert_eq!(cfg.routes.sessions(), "/cam/sessions");
        assert_eq!(cfg.routes.snapshot(), "/cam/snapshot");
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let err = config(&[("DEVICE_API_BASE", "http://dev"), ("CONTROL_TIMEOUT_SECS", "0")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "CONTROL_TIMEOUT_SECS", .. }));

        let err = config(&[("DEVICE_API_BASE", "http://dev"), ("VIDEO_STALE_TIMEOUT_MS", "0")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "VIDEO_STALE_TIMEOUT_MS", .. }));

        let err = config(&[
            ("DEVICE_API_BASE", "http://dev"),
            ("VIDEO_API_URL", "http://cam/stream.mjpg"),
            ("VIDEO_SNAPSHOT_URL", "http://cam/snapshot.jpg"),
            ("VIDEO_SNAPSHOT_TIMEOUT_SECS", "0"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { key: "VIDEO_SNAPSHOT_TIMEOUT_SECS", .. }
        ));
    }

    #[test]
    fn infer_endpoint_is_optional() {
        let cfg = config(&[
            ("STATUS_API", "http://dev/s"),
            ("TELEMETRY_API", "http://dev/t"),
            ("CONTROL_API", "http://dev/c"),
            ("OTA_API", "http://dev/o"),
        ])
        .unwrap();
        assert!(cfg.upstream.infer.is_none());

        let cfg = config(&[("DEVICE_API_BASE", "http://dev")]).unwrap();
        let infer = cfg.upstream.infer.unwrap();
        assert_eq!(infer.url.as_str(), "http://dev/api/v1/infer");
        assert_eq!(infer.timeout, Duration::from_secs(30));
        assert_eq!(cfg.routes.infer, "/infer");
    }

    #[test]
    fn firmware_limit_is_configurable() {
        let cfg = config(&[("DEVICE_API_BASE", "http://dev")]).unwrap();
        assert_eq!(cfg.max_firmware_size, DEFAULT_MAX_FIRMWARE_SIZE);

        let cfg = config(&[("DEVICE_API_BASE", "http://dev"), ("OTA_MAX_BYTES", "1024")]).unwrap();
        assert_eq!(cfg.max_firmware_size, 1024);

        let err = config(&[("DEVICE_API_BASE", "http://dev"), ("OTA_MAX_BYTES", "0")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "OTA_MAX_BYTES", .. }));
    }

    #[test]
    fn device_ports_are_parsed() {
        let cfg = config(&[
            ("DEVICE_API_BASE", "http://dev"),
            ("MQTT_PORT", "1883"),
            ("S7_PORT", "102"),
        ])
        .unwrap();
        assert_eq!(cfg.device_ports.mqtt, Some(1883));
        assert_eq!(cfg.device_ports.modbus, None);
        assert_eq!(cfg.device_ports.s7, Some(102));
    }
}
