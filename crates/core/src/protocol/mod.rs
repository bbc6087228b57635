//! HTTP-facing protocol pieces.
//!
//! - [`handler`]: axum route handlers for every gateway endpoint.
//! - [`multipart`]: `multipart/x-mixed-replace` framing for the live relay.
//! - [`request`]: caller request bodies and their validation.
//!
//! ## Endpoints
//!
//! | Method | Default path | Behavior |
//! |--------|--------------|----------|
//! | GET | `/status`, `/telemetry` | Relay to the device, copy status/headers/body |
//! | POST | `/control` | Validate `{command, params?}`, relay |
//! | POST | `/ota` | Manifest JSON, raw firmware, or multipart upload; relay |
//! | GET | `/video` | Live MJPEG stream until the client leaves |
//! | GET | `/video/sessions` | Active stream sessions |
//! | GET | `/healthz` | Gateway and frame-source health |

pub mod handler;
pub mod multipart;
pub mod request;

pub use request::{ControlRequest, FirmwareUploadReport, OtaManifest};
