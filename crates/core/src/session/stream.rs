//! Per-client cadence loop that turns the register into a multipart stream.
//!
//! Every session runs in its own task and owns nothing shared except a
//! read-only handle to the [`LatestFrameRegister`]. On each tick it takes a
//! snapshot and, if there is a frame, writes one chunk. The chunk goes into
//! a one-slot channel whose receiver is the HTTP response body, so:
//!
//! - a slow client only slows its own task (the send waits), never the
//!   producer or other sessions;
//! - a disconnected client drops the body, which closes the channel and
//!   ends the loop on the next poll.
//!
//! Cancellation always wins over a tick: the loop's `select!` is biased
//! towards the disconnect and shutdown branches. Shutdown and the duration
//! cap are checked again while a write is pending, so a client that stays
//! connected but stops reading cannot hold a session past its limits.
//!
//! When no new frame has arrived since the previous tick, the previous
//! frame is sent again (freeze-frame), unless a
//! [`StalePolicy::StopAfter`] age has been configured.

use std::future;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{StalePolicy, StreamConfig};
use crate::frame::{Frame, LatestFrameRegister};
use crate::protocol::multipart;
use crate::session::{SessionGuard, SessionState};

/// Why a session stopped writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReason {
    /// The client went away (body dropped).
    ClientGone,
    /// A write could not be delivered.
    WriteFailed,
    /// Gateway shutdown.
    Shutdown,
    FrameLimit,
    DurationLimit,
}

impl DrainReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::ClientGone => "client disconnected",
            Self::WriteFailed => "write failed",
            Self::Shutdown => "gateway shutting down",
            Self::FrameLimit => "frame limit reached",
            Self::DurationLimit => "duration limit reached",
        }
    }
}

/// One client's subscription to the live feed.
pub struct StreamSession {
    session: SessionGuard,
    register: Arc<LatestFrameRegister>,
    config: StreamConfig,
    shutdown: CancellationToken,
}

impl StreamSession {
    pub fn new(
        session: SessionGuard,
        register: Arc<LatestFrameRegister>,
        config: StreamConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session,
            register,
            config,
            shutdown,
        }
    }

    /// Start the cadence loop on its own task.
    ///
    /// Returns the chunk receiver (to be used as the response body) and the
    /// task handle. Dropping the receiver ends the session.
    pub fn spawn(self) -> (mpsc::Receiver<Bytes>, JoinHandle<DrainReason>) {
        let (tx, rx) = mpsc::channel(1);
        let span = tracing::info_span!("stream", id = %self.session.id, peer = %self.session.peer);
        let handle = tokio::spawn(self.run(tx).instrument(span));
        (rx, handle)
    }

    /// Run the cadence loop until cancellation, write failure or a limit.
    pub async fn run(self, tx: mpsc::Sender<Bytes>) -> DrainReason {
        let session = &self.session;
        session.set_state(SessionState::Streaming);
        tracing::info!("stream started");

        let mut ticker = time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let deadline = async {
            match self.config.max_duration {
                Some(limit) => time::sleep_until(Instant::now() + limit).await,
                None => future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let reason = loop {
            tokio::select! {
                biased;
                _ = tx.closed() => break DrainReason::ClientGone,
                _ = self.shutdown.cancelled() => break DrainReason::Shutdown,
                _ = &mut deadline => break DrainReason::DurationLimit,
                _ = ticker.tick() => {}
            }

            let Some(frame) = self.register.snapshot() else {
                continue;
            };
            if self.is_stale(&frame) {
                continue;
            }

            let chunk = multipart::encode_chunk(frame.payload());
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break DrainReason::Shutdown,
                _ = &mut deadline => break DrainReason::DurationLimit,
                sent = tx.send(chunk) => {
                    if sent.is_err() {
                        break DrainReason::WriteFailed;
                    }
                }
            }

            let written = session.record_frame(frame.sequence());
            if self.config.max_frames.is_some_and(|max| written >= max) {
                break DrainReason::FrameLimit;
            }
        };

        session.set_state(SessionState::Draining);
        drop(tx);
        tracing::info!(
            reason = reason.as_str(),
            frames_sent = session.frames_sent(),
            "stream ended"
        );
        reason
    }

    fn is_stale(&self, frame: &Frame) -> bool {
        match self.config.stale {
            StalePolicy::FreezeFrame => false,
            StalePolicy::StopAfter(max_age) => frame.received_at().elapsed() > max_age,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManager;
    use std::time::Duration;

    const CADENCE: Duration = Duration::from_millis(40);

    fn stream_config() -> StreamConfig {
        StreamConfig {
            interval: CADENCE,
            ..StreamConfig::default()
        }
    }

    fn start(
        manager: &SessionManager,
        register: &Arc<LatestFrameRegister>,
        config: StreamConfig,
        shutdown: &CancellationToken,
    ) -> (mpsc::Receiver<Bytes>, JoinHandle<DrainReason>) {
        StreamSession::new(
            manager.create_session("test"),
            register.clone(),
            config,
            shutdown.clone(),
        )
        .spawn()
    }

    /// Extract the payload from a chunk produced by `encode_chunk`.
    fn payload_of(chunk: &Bytes) -> &[u8] {
        let split = chunk
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("chunk header terminator");
        &chunk[split + 4..chunk.len() - 2]
    }

    #[tokio::test(start_paused = true)]
    async fn empty_register_emits_nothing_until_publish() {
        let manager = SessionManager::new();
        let register = Arc::new(LatestFrameRegister::new());
        let shutdown = CancellationToken::new();
        let (mut rx, _task) = start(&manager, &register, stream_config(), &shutdown);

        let waited = time::timeout(CADENCE * 10, rx.recv()).await;
        assert!(waited.is_err(), "no chunk may be written before the first frame");

        register.publish(Bytes::from_static(b"first"));
        let chunk = time::timeout(CADENCE * 2, rx.recv())
            .await
            .expect("chunk on the next tick")
            .unwrap();
        assert_eq!(payload_of(&chunk), b"first");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_register_repeats_last_frame() {
        let manager = SessionManager::new();
        let register = Arc::new(LatestFrameRegister::new());
        let shutdown = CancellationToken::new();
        register.publish(Bytes::from_static(b"still"));

        let (mut rx, _task) = start(&manager, &register, stream_config(), &shutdown);
        for _ in 0..5 {
            let chunk = rx.recv().await.unwrap();
            assert_eq!(payload_of(&chunk), b"still");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn observes_non_decreasing_sequence_and_final_frame() {
        let manager = SessionManager::new();
        let register = Arc::new(LatestFrameRegister::new());
        let shutdown = CancellationToken::new();
        let (mut rx, _task) = start(&manager, &register, stream_config(), &shutdown);

        let producer = {
            let register = register.clone();
            tokio::spawn(async move {
                for i in 1..=20u64 {
                    register.publish(Bytes::copy_from_slice(&i.to_be_bytes()));
                    time::sleep(Duration::from_millis(13)).await;
                }
            })
        };

        let mut last = 0u64;
        loop {
            let chunk = rx.recv().await.unwrap();
            let seq = u64::from_be_bytes(payload_of(&chunk).try_into().unwrap());
            assert!(seq >= last, "sequence went backwards: {seq} < {last}");
            last = seq;
            if seq == 20 {
                break;
            }
        }
        producer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_ends_session_and_releases_it() {
        let manager = SessionManager::new();
        let register = Arc::new(LatestFrameRegister::new());
        let shutdown = CancellationToken::new();
        register.publish(Bytes::from_static(b"x"));

        let (mut rx, task) = start(&manager, &register, stream_config(), &shutdown);
        rx.recv().await.unwrap();
        assert_eq!(manager.len(), 1);

        drop(rx);
        assert_eq!(task.await.unwrap(), DrainReason::ClientGone);
        assert!(manager.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wins_over_pending_write() {
        let manager = SessionManager::new();
        let register = Arc::new(LatestFrameRegister::new());
        let shutdown = CancellationToken::new();
        register.publish(Bytes::from_static(b"x"));

        let (mut rx, task) = start(&manager, &register, stream_config(), &shutdown);
        // Let the channel fill and the next write block on the unread slot.
        time::sleep(CADENCE * 3).await;
        let session = manager.list().pop().unwrap();
        assert_eq!(session.frames_sent, 1);

        shutdown.cancel();
        assert_eq!(task.await.unwrap(), DrainReason::Shutdown);

        // Only the chunk buffered before cancellation is ever delivered.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
        assert!(manager.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn frame_limit_ends_session() {
        let manager = SessionManager::new();
        let register = Arc::new(LatestFrameRegister::new());
        let shutdown = CancellationToken::new();
        register.publish(Bytes::from_static(b"x"));

        let config = StreamConfig {
            max_frames: Some(3),
            ..stream_config()
        };
        let (mut rx, task) = start(&manager, &register, config, &shutdown);

        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 3);
        assert_eq!(task.await.unwrap(), DrainReason::FrameLimit);
    }

    #[tokio::test(start_paused = true)]
    async fn duration_limit_ends_session() {
        let manager = SessionManager::new();
        let register = Arc::new(LatestFrameRegister::new());
        let shutdown = CancellationToken::new();

        let config = StreamConfig {
            max_duration: Some(Duration::from_secs(1)),
            ..stream_config()
        };
        let (mut rx, task) = start(&manager, &register, config, &shutdown);

        assert!(rx.recv().await.is_none());
        assert_eq!(task.await.unwrap(), DrainReason::DurationLimit);
    }

    #[tokio::test(start_paused = true)]
    async fn duration_limit_ends_session_with_unread_channel() {
        let manager = SessionManager::new();
        let register = Arc::new(LatestFrameRegister::new());
        let shutdown = CancellationToken::new();
        register.publish(Bytes::from_static(b"x"));

        let config = StreamConfig {
            max_duration: Some(Duration::from_secs(1)),
            ..stream_config()
        };
        // Held but never read: the second write blocks on the full slot.
        let (_rx, task) = start(&manager, &register, config, &shutdown);

        let reason = time::timeout(Duration::from_secs(2), task)
            .await
            .expect("duration cap ends a session with a stalled reader")
            .unwrap();
        assert_eq!(reason, DrainReason::DurationLimit);
        assert!(manager.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_after_policy_pauses_on_stale_frames() {
        let manager = SessionManager::new();
        let register = Arc::new(LatestFrameRegister::new());
        let shutdown = CancellationToken::new();
        register.publish(Bytes::from_static(b"old"));

        let config = StreamConfig {
            stale: StalePolicy::StopAfter(Duration::from_millis(100)),
            ..stream_config()
        };
        let (mut rx, _task) = start(&manager, &register, config, &shutdown);

        // Drain everything sent while the frame was still fresh.
        while time::timeout(CADENCE * 2, rx.recv()).await.is_ok() {}
        assert!(time::timeout(Duration::from_secs(1), rx.recv()).await.is_err());

        register.publish(Bytes::from_static(b"new"));
        let chunk = time::timeout(CADENCE * 2, rx.recv())
            .await
            .expect("fresh frame resumes output")
            .unwrap();
        assert_eq!(payload_of(&chunk), b"new");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_consumer_does_not_delay_other_session() {
        let manager = SessionManager::new();
        let register = Arc::new(LatestFrameRegister::new());
        let shutdown = CancellationToken::new();

        let (_stalled, _a) = start(&manager, &register, stream_config(), &shutdown);
        let (mut live, _b) = start(&manager, &register, stream_config(), &shutdown);

        for i in 1..=10u64 {
            register.publish(Bytes::copy_from_slice(&i.to_be_bytes()));
            let chunk = time::timeout(CADENCE * 2, live.recv())
                .await
                .expect("live session keeps its cadence")
                .unwrap();
            let seq = u64::from_be_bytes(payload_of(&chunk).try_into().unwrap());
            assert_eq!(seq, i);
        }
    }
}
