pub mod config;
pub mod error;
pub mod frame;
pub mod health;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use config::GatewayConfig;
pub use error::{ConfigError, GatewayError, Result};
pub use frame::{Frame, LatestFrameRegister};
pub use server::{AppState, Gateway};
