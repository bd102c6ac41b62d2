//! One open connection and its outbound delivery handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relay_core::{ConnectionId, DeliveryError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Non-blocking outbound capability of a session.
///
/// Implementations must fail fast rather than wait for the peer.
pub trait Outbound: Send + Sync + 'static {
    /// Hand one serialized frame to the connection's writer.
    fn try_deliver(&self, frame: Arc<str>) -> Result<(), DeliveryError>;
}

impl Outbound for mpsc::Sender<Arc<str>> {
    fn try_deliver(&self, frame: Arc<str>) -> Result<(), DeliveryError> {
        self.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// A connected client.
///
/// Owned by the transport; the routing table holds `Arc` handles. Never
/// touches the registries itself.
pub struct Session {
    /// Connection identifier.
    pub id: ConnectionId,
    outbound: Box<dyn Outbound>,
    drops: AtomicU64,
    opened_at: Instant,
    /// Milliseconds after `opened_at` at which the peer was last heard from.
    last_seen_ms: AtomicU64,
    closed: CancellationToken,
}

impl Session {
    /// Wrap an outbound capability.
    pub fn new(id: ConnectionId, outbound: impl Outbound) -> Self {
        Self {
            id,
            outbound: Box::new(outbound),
            drops: AtomicU64::new(0),
            opened_at: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// Attempt delivery. Queue overflows are counted towards slow-client eviction.
    pub fn send(&self, frame: Arc<str>) -> Result<(), DeliveryError> {
        if self.closed.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        let result = self.outbound.try_deliver(frame);
        if result == Err(DeliveryError::QueueFull) {
            let _ = self.drops.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Lifetime count of frames dropped on a full queue.
    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    /// Ask the transport to close this connection.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`Session::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the session is closed by the server.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Record that the peer is alive (any inbound frame or pong).
    pub fn touch(&self) {
        let elapsed = self.opened_at.elapsed().as_millis() as u64;
        self.last_seen_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Time since the peer was last heard from.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.opened_at.elapsed().saturating_sub(last)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("drops", &self.drop_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_session(capacity: usize) -> (Session, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Session::new(ConnectionId::new(), tx), rx)
    }

    #[tokio::test]
    async fn send_queues_frame() {
        let (session, mut rx) = channel_session(4);
        session.send(Arc::from("hello")).unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
        assert_eq!(session.drop_count(), 0);
    }

    #[test]
    fn full_queue_fails_fast_and_counts() {
        let (session, _rx) = channel_session(1);
        session.send(Arc::from("a")).unwrap();
        assert_eq!(session.send(Arc::from("b")), Err(DeliveryError::QueueFull));
        assert_eq!(session.send(Arc::from("c")), Err(DeliveryError::QueueFull));
        assert_eq!(session.drop_count(), 2);
    }

    #[test]
    fn dropped_receiver_is_closed() {
        let (session, rx) = channel_session(4);
        drop(rx);
        assert_eq!(session.send(Arc::from("a")), Err(DeliveryError::Closed));
        assert_eq!(session.drop_count(), 0);
    }

    #[test]
    fn closed_session_rejects_sends() {
        let (session, mut rx) = channel_session(4);
        let token = session.close_token();
        session.close();
        assert!(session.is_closed());
        assert!(token.is_cancelled());
        assert_eq!(session.send(Arc::from("a")), Err(DeliveryError::Closed));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_resets_on_touch() {
        let (session, _rx) = channel_session(1);
        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(session.idle_for() >= Duration::from_secs(40));

        session.touch();
        assert!(session.idle_for() < Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(session.idle_for() >= Duration::from_secs(5));
    }
}
