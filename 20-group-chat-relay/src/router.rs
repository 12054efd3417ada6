use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    registry::Registry,
    session::{Session, SessionId},
};

/// Outcome of one [`Router::broadcast`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Fans frames out to every registered session except the sender.
///
/// One lock covers both the registry and the writes of a broadcast. A
/// broadcast holds it until every recipient has either accepted the frame or
/// been dropped, so no two broadcasts interleave and every recipient sees
/// frames in the order the router accepted them. Connects and disconnects
/// queue behind the same lock.
#[derive(Default)]
pub struct Router {
    state: Mutex<RouterState>,
}

#[derive(Default)]
struct RouterState {
    registry: Registry,
    shut_down: bool,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session and returns the number of live sessions, or `None` if the
    /// router has been shut down or the session is already closed.
    pub async fn register(&self, session: Arc<Session>) -> Option<usize> {
        let mut state = self.state.lock().await;
        if state.shut_down || !state.registry.add(Arc::clone(&session)) {
            drop(state);
            close_session(&session).await;
            return None;
        }
        Some(state.registry.len())
    }

    /// Removes and closes a session.
    ///
    /// Returns the number of sessions left for the call that removed it and
    /// `None` if it was already gone, so a session is only ever counted out once.
    pub async fn unregister(&self, id: SessionId) -> Option<usize> {
        let mut state = self.state.lock().await;
        let session = state.registry.remove(id)?;
        close_session(&session).await;
        Some(state.registry.len())
    }

    /// Sends `text` to every session but `sender`.
    ///
    /// A sender that is no longer registered has been dropped or closed, so
    /// its frame is discarded without reaching anyone.
    pub async fn broadcast(&self, sender: SessionId, text: &str) -> BroadcastReport {
        let mut state = self.state.lock().await;
        if !state.registry.contains(sender) {
            debug!(session = sender, "ignoring frame from unregistered session");
            return BroadcastReport::default();
        }

        let mut recipients = Vec::with_capacity(state.registry.len());
        state
            .registry
            .for_each_except(sender, |session| recipients.push(Arc::clone(session)));

        let results = join_all(
            recipients
                .iter()
                .map(|session| async move { (session, session.send(text).await) }),
        )
        .await;

        let mut report = BroadcastReport::default();
        for (session, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    warn!(session = session.id(), peer = ?session.peer(), %error, "dropping recipient");
                    state.registry.remove(session.id());
                    close_session(session).await;
                    report.dropped += 1;
                }
            }
        }

        report
    }

    /// Number of live sessions.
    pub async fn connected(&self) -> usize {
        self.state.lock().await.registry.len()
    }

    /// Closes every session and refuses new registrations.
    pub async fn close_all(&self) -> usize {
        let mut state = self.state.lock().await;
        state.shut_down = true;
        let sessions = state.registry.drain();
        for session in &sessions {
            close_session(session).await;
        }
        sessions.len()
    }
}

async fn close_session(session: &Session) {
    if let Err(error) = session.close().await {
        debug!(session = session.id(), ?error, "error while closing session");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::DuplexStream;

    use super::*;
    use crate::frame::read_frame;

    async fn join(router: &Router, id: SessionId, timeout: Duration) -> DuplexStream {
        let (writer, client) = tokio::io::duplex(1024);
        let session = Arc::new(Session::new(id, None, writer, timeout));
        router.register(session).await.expect("register");
        client
    }

    #[tokio::test]
    async fn broadcast_skips_the_sender() {
        let router = Router::new();
        let mut a = join(&router, 1, Duration::from_secs(1)).await;
        let mut b = join(&router, 2, Duration::from_secs(1)).await;
        let mut c = join(&router, 3, Duration::from_secs(1)).await;

        let report = router.broadcast(1, "hello").await;

        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 0 });
        assert_eq!(read_frame(&mut b).await.expect("b"), "hello");
        assert_eq!(read_frame(&mut c).await.expect("c"), "hello");

        // Nothing was written to the sender; its stream only ends once the router closes it.
        router.close_all().await;
        assert!(read_frame(&mut a).await.is_err());
    }

    #[tokio::test]
    async fn failed_recipient_does_not_block_the_rest() {
        let router = Router::new();
        let _a = join(&router, 1, Duration::from_secs(1)).await;
        let dead = join(&router, 2, Duration::from_secs(1)).await;
        let mut c = join(&router, 3, Duration::from_secs(1)).await;
        drop(dead);

        let report = router.broadcast(1, "still here").await;

        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert_eq!(read_frame(&mut c).await.expect("c"), "still here");
        assert_eq!(router.connected().await, 2);

        let report = router.broadcast(1, "and again").await;
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 0 });
        assert_eq!(read_frame(&mut c).await.expect("c"), "and again");
    }

    #[tokio::test]
    async fn stalled_recipient_is_dropped_after_timeout() {
        let router = Router::new();
        let _a = join(&router, 1, Duration::from_secs(1)).await;
        let mut b = join(&router, 2, Duration::from_secs(1)).await;

        let (writer, _stalled) = tokio::io::duplex(4);
        let stalled = Arc::new(Session::new(3, None, writer, Duration::from_millis(50)));
        router.register(stalled).await.expect("register");

        let report = router.broadcast(1, "too big for a four byte pipe").await;

        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert_eq!(read_frame(&mut b).await.expect("b"), "too big for a four byte pipe");
        assert_eq!(router.connected().await, 2);
    }

    #[tokio::test]
    async fn broadcast_from_unregistered_sender_is_ignored() {
        let router = Router::new();
        let _a = join(&router, 1, Duration::from_secs(1)).await;
        let mut b = join(&router, 2, Duration::from_secs(1)).await;

        assert_eq!(router.unregister(1).await, Some(1));
        let report = router.broadcast(1, "from beyond").await;
        assert_eq!(report, BroadcastReport::default());

        let report = router.broadcast(99, "never joined").await;
        assert_eq!(report, BroadcastReport::default());

        let nothing = tokio::time::timeout(Duration::from_millis(100), read_frame(&mut b)).await;
        assert!(nothing.is_err(), "expected no frame, got {nothing:?}");
    }

    #[tokio::test]
    async fn unregister_counts_a_session_out_once() {
        let router = Router::new();
        let _a = join(&router, 1, Duration::from_secs(1)).await;
        let _b = join(&router, 2, Duration::from_secs(1)).await;

        assert_eq!(router.unregister(1).await, Some(1));
        assert_eq!(router.unregister(1).await, None);
        assert_eq!(router.connected().await, 1);
    }

    #[tokio::test]
    async fn close_all_rejects_late_registrations() {
        let router = Router::new();
        let _a = join(&router, 1, Duration::from_secs(1)).await;

        assert_eq!(router.close_all().await, 1);

        let (writer, _client) = tokio::io::duplex(64);
        let late = Arc::new(Session::new(2, None, writer, Duration::from_secs(1)));
        assert_eq!(router.register(Arc::clone(&late)).await, None);
        assert!(late.is_closed());
        assert_eq!(router.connected().await, 0);
    }

    #[tokio::test]
    async fn broadcasts_arrive_in_acceptance_order() {
        let router = Arc::new(Router::new());
        let mut observers = Vec::new();
        for id in 10..13 {
            observers.push(join(&router, id, Duration::from_secs(1)).await);
        }
        // Senders must be registered for their frames to be relayed.
        let mut _sender_streams = Vec::new();
        for id in 1..=3 {
            _sender_streams.push(join(&router, id, Duration::from_secs(1)).await);
        }

        let mut senders = Vec::new();
        for sender in 1..=3u64 {
            let router = Arc::clone(&router);
            senders.push(tokio::spawn(async move {
                for seq in 0..20 {
                    router.broadcast(sender, &format!("{sender}-{seq}")).await;
                }
            }));
        }
        for sender in senders {
            sender.await.expect("sender task");
        }

        let mut sequences = Vec::new();
        for observer in &mut observers {
            let mut seen = Vec::new();
            for _ in 0..60 {
                seen.push(read_frame(observer).await.expect("frame"));
            }
            sequences.push(seen);
        }

        assert_eq!(sequences[0], sequences[1]);
        assert_eq!(sequences[1], sequences[2]);
    }
}
