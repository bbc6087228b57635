//! Caller-supplied request bodies and their validation.
//!
//! Validation happens before any upstream call: a body that fails here is
//! answered with 400 and the device is never contacted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GatewayError, Result};

/// A device control command, e.g. `{"command": "restart"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl ControlRequest {
    /// Parse and validate a JSON control body.
    ///
    /// `command` must be a non-empty string; `params`, if present, must be
    /// an object (`null` is treated as absent).
    pub fn parse(body: &[u8]) -> Result<Self> {
        let request: Self = serde_json::from_slice(body)
            .map_err(|e| GatewayError::BadRequest(format!("invalid control body: {e}")))?;

        if request.command.trim().is_empty() {
            return Err(GatewayError::BadRequest(
                "field `command` must be a non-empty string".to_string(),
            ));
        }
        Ok(request)
    }
}

/// A firmware update manifest pointing the device at a download.
///
/// Accepts `url`, `download_url` or `firmware_url` for the location.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OtaManifest {
    pub version: String,
    #[serde(alias = "download_url", alias = "firmware_url")]
    pub url: String,
    #[serde(default)]
    pub checksum: Option<String>,
}

impl OtaManifest {
    /// Parse and validate a JSON manifest.
    ///
    /// Returns the manifest together with the full JSON value, including
    /// device-specific fields the manifest does not model.
    pub fn parse(body: &[u8]) -> Result<(Self, Value)> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| GatewayError::BadRequest(format!("invalid OTA body: {e}")))?;
        let manifest: Self = serde_json::from_value(value.clone())
            .map_err(|e| GatewayError::BadRequest(format!("invalid OTA manifest: {e}")))?;

        if manifest.version.trim().is_empty() {
            return Err(GatewayError::BadRequest(
                "field `version` must be a non-empty string".to_string(),
            ));
        }
        if manifest.url.trim().is_empty() {
            return Err(GatewayError::BadRequest(
                "firmware download url must be a non-empty string".to_string(),
            ));
        }
        Ok((manifest, value))
    }
}

/// Gateway answer for a forwarded firmware payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareUploadReport {
    /// Bytes forwarded to the device; equals the submitted payload length.
    pub size: usize,
    pub filename: Option<String>,
    pub device_status: u16,
    /// Device response body: JSON when it parses, otherwise text.
    pub device_response: Value,
}
