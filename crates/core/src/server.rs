use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{GatewayConfig, VideoSource};
use crate::error::Result;
use crate::frame::LatestFrameRegister;
use crate::health::{SourceHealth, SourceState};
use crate::protocol::handler;
use crate::session::SessionManager;
use crate::transport::{UdpFrameSource, UpstreamClient};

/// Everything a request handler can reach.
///
/// Cheap to clone: every field is either `Arc`-backed or a handle.
#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub register: Arc<LatestFrameRegister>,
    pub health: Arc<SourceHealth>,
    pub sessions: SessionManager,
    pub upstream: UpstreamClient,
    /// Cancelled once when the gateway shuts down.
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

/// The gateway process: HTTP front end plus the frame ingest task.
///
/// Owns the shared register, session manager and shutdown token. One
/// ingest task feeds the register; every `/video` request gets its own
/// cadence task reading from it.
pub struct Gateway {
    state: AppState,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let initial = match config.video.source {
            VideoSource::Disabled => SourceState::Disabled,
            VideoSource::Udp { .. } | VideoSource::Http { .. } => SourceState::Idle,
        };
        let upstream = UpstreamClient::new(config.upstream.token.clone())?;

        Ok(Self {
            state: AppState {
                config: Arc::new(config),
                register: Arc::new(LatestFrameRegister::new()),
                health: Arc::new(SourceHealth::new(initial)),
                sessions: SessionManager::new(),
                upstream,
                shutdown: CancellationToken::new(),
                started_at: Instant::now(),
            },
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Token that stops the gateway when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    pub fn router(&self) -> Router {
        handler::router(self.state.clone())
    }

    /// Bind the configured HTTP address and serve until shutdown.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.state.config.bind).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until the shutdown token fires.
    ///
    /// Starts the UDP ingest task first when a datagram source is
    /// configured; failing to bind it is fatal.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let shutdown = self.state.shutdown.clone();

        let ingest = match self.state.config.video.source {
            VideoSource::Udp { bind } => {
                let source = UdpFrameSource::bind(
                    bind,
                    self.state.register.clone(),
                    self.state.health.clone(),
                )
                .await?;
                Some(tokio::spawn(source.run(shutdown.clone())))
            }
            VideoSource::Http { ref url, .. } => {
                tracing::info!(%url, "video pass-through enabled");
                None
            }
            VideoSource::Disabled => {
                tracing::info!("video disabled");
                None
            }
        };

        let addr = listener.local_addr()?;
        tracing::info!(%addr, "gateway listening");

        let app = self.router();
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;

        // An accept error ends the server without anyone cancelling.
        shutdown.cancel();
        if let Some(task) = ingest {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "ingest task panicked");
            }
        }
        tracing::info!("gateway stopped");

        served?;
        Ok(())
    }
}
