use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::frame::LatestFrameRegister;
use crate::health::{SourceHealth, SourceState};

/// Largest datagram payload accepted. One datagram carries one frame;
/// nothing is reassembled across datagrams.
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Datagram frame source.
///
/// Binds a socket on the configured address and turns every non-empty
/// datagram into a new frame in the [`LatestFrameRegister`]. It never waits
/// on consumers: each datagram overwrites whatever the register held.
///
/// This layer is session-agnostic: it does not know how many
/// clients are watching, and client churn never reaches it.
pub struct UdpFrameSource {
    socket: UdpSocket,
    register: Arc<LatestFrameRegister>,
    health: Arc<SourceHealth>,
}

impl UdpFrameSource {
    /// Bind the ingest socket.
    pub async fn bind(
        addr: SocketAddr,
        register: Arc<LatestFrameRegister>,
        health: Arc<SourceHealth>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        health.set(SourceState::Idle);
        Ok(Self {
            socket,
            register,
            health,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive until `shutdown` fires or the socket fails.
    ///
    /// A read error ends ingestion and marks the source failed; sessions
    /// already streaming keep serving the last frame.
    pub async fn run(self, shutdown: CancellationToken) {
        let addr = self.socket.local_addr().ok();
        tracing::info!(addr = ?addr, "frame ingest listening");

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut dropped = 0u64;
        let mut running = false;

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, from)) => match self.register.publish(Bytes::copy_from_slice(&buf[..len])) {
                    Some(sequence) => {
                        if sequence == 1 {
                            tracing::info!(%from, len, "first frame received");
                        }
                        if !running {
                            self.health.set(SourceState::Running);
                            running = true;
                        }
                    }
                    None => {
                        dropped += 1;
                        tracing::trace!(%from, dropped, "empty datagram dropped");
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "frame ingest stopped");
                    self.health.set(SourceState::Failed(e.to_string()));
                    return;
                }
            }
        }

        self.health.set(SourceState::Idle);
        tracing::debug!(last_sequence = self.register.last_sequence(), "frame ingest exited");
    }
}
