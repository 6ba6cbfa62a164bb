//! services/client/src/mcq/channel.rs
//!
//! A reconnecting duplex channel delivering push notifications for
//! long-running operations, keyed by request id. The channel only routes
//! messages; it does not own operation lifecycle.

use mcq_core::domain::RealtimeMessage;
use mcq_core::ports::RealtimeTransport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

struct RoutedHandler {
    token: u64,
    tx: mpsc::UnboundedSender<RealtimeMessage>,
}

struct ChannelShared {
    state: ConnectionState,
    handlers: HashMap<String, RoutedHandler>,
    next_token: u64,
    outbound: Option<mpsc::UnboundedSender<RealtimeMessage>>,
}

/// The reconnecting channel. `start` spawns a runner task that dials the
/// transport, dispatches inbound messages to subscribers, and reconnects
/// with exponential backoff; after `max_reconnect_attempts` consecutive
/// failures it gives up until `reconnect` is called.
pub struct RealtimeChannel {
    shared: Arc<Mutex<ChannelShared>>,
    transport: Arc<dyn RealtimeTransport>,
    max_reconnect_attempts: u32,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeChannel {
    pub fn new(transport: Arc<dyn RealtimeTransport>) -> Self {
        Self::with_max_attempts(transport, DEFAULT_MAX_RECONNECT_ATTEMPTS)
    }

    pub fn with_max_attempts(
        transport: Arc<dyn RealtimeTransport>,
        max_reconnect_attempts: u32,
    ) -> Self {
        Self {
            shared: Arc::new(Mutex::new(ChannelShared {
                state: ConnectionState::Closed,
                handlers: HashMap::new(),
                next_token: 0,
                outbound: None,
            })),
            transport,
            max_reconnect_attempts,
            runner: Mutex::new(None),
        }
    }

    /// Starts (or restarts) the connection runner.
    pub fn start(&self) {
        let mut runner = self.runner.lock().unwrap();
        if let Some(previous) = runner.take() {
            previous.abort();
        }
        *runner = Some(tokio::spawn(Self::run(
            Arc::clone(&self.shared),
            Arc::clone(&self.transport),
            self.max_reconnect_attempts,
        )));
    }

    /// Manual reconnect after the channel gave up on its own.
    pub fn reconnect(&self) {
        info!("manual reconnect requested");
        self.start();
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().unwrap().state
    }

    /// Registers the handler for `request_id`, silently replacing any
    /// previous one. Messages for ids without a handler are dropped.
    pub fn subscribe(&self, request_id: impl Into<String>) -> ProgressSubscription {
        let request_id = request_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let token = {
            let mut shared = self.shared.lock().unwrap();
            let token = shared.next_token;
            shared.next_token += 1;
            shared
                .handlers
                .insert(request_id.clone(), RoutedHandler { token, tx });
            token
        };
        ProgressSubscription {
            request_id,
            token,
            receiver: rx,
            shared: Arc::clone(&self.shared),
            active: true,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().unwrap().handlers.len()
    }

    /// Queues an outbound message. A no-op with a logged warning when the
    /// channel is not currently open; nothing is buffered while disconnected.
    pub fn send(&self, message: RealtimeMessage) {
        let shared = self.shared.lock().unwrap();
        match (&shared.state, &shared.outbound) {
            (ConnectionState::Open, Some(tx)) => {
                let _ = tx.send(message);
            }
            _ => warn!("realtime channel is not connected; dropping outbound message"),
        }
    }

    async fn run(
        shared: Arc<Mutex<ChannelShared>>,
        transport: Arc<dyn RealtimeTransport>,
        max_reconnect_attempts: u32,
    ) {
        let mut attempts: u32 = 0;
        loop {
            shared.lock().unwrap().state = ConnectionState::Connecting;
            match transport.connect().await {
                Ok(mut conn) => {
                    info!("realtime channel connected");
                    attempts = 0;
                    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
                    {
                        let mut s = shared.lock().unwrap();
                        s.state = ConnectionState::Open;
                        s.outbound = Some(outbound_tx);
                    }
                    loop {
                        tokio::select! {
                            inbound = conn.recv() => match inbound {
                                Some(Ok(message)) => Self::dispatch(&shared, message),
                                Some(Err(e)) => warn!("dropping malformed realtime message: {e}"),
                                None => {
                                    info!("realtime channel disconnected");
                                    break;
                                }
                            },
                            outbound = outbound_rx.recv() => match outbound {
                                Some(message) => {
                                    if let Err(e) = conn.send(&message).await {
                                        warn!("failed to send realtime message: {e}");
                                        break;
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                }
                Err(e) => warn!("realtime connection failed: {e}"),
            }
            {
                let mut s = shared.lock().unwrap();
                s.state = ConnectionState::Closed;
                s.outbound = None;
            }
            if attempts >= max_reconnect_attempts {
                error!(
                    "realtime channel unavailable after {attempts} reconnect attempts; giving up"
                );
                break;
            }
            attempts += 1;
            let delay = BASE_RECONNECT_DELAY * 2u32.pow(attempts);
            info!(
                "attempting to reconnect ({attempts}/{max_reconnect_attempts}) in {delay:?}"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn dispatch(shared: &Arc<Mutex<ChannelShared>>, message: RealtimeMessage) {
        let mut shared = shared.lock().unwrap();
        let request_id = message.request_id().to_string();
        if let Some(handler) = shared.handlers.get(&request_id) {
            if handler.tx.send(message).is_err() {
                // The subscription side is gone; drop the stale routing entry.
                shared.handlers.remove(&request_id);
            }
        }
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        if let Some(runner) = self.runner.lock().unwrap().take() {
            runner.abort();
        }
    }
}

/// A live subscription for one request id. Messages arrive in transport
/// order. Unsubscribing (explicitly or on drop) removes the routing entry;
/// doing so twice is safe.
pub struct ProgressSubscription {
    request_id: String,
    token: u64,
    receiver: mpsc::UnboundedReceiver<RealtimeMessage>,
    shared: Arc<Mutex<ChannelShared>>,
    active: bool,
}

impl ProgressSubscription {
    /// The next message routed to this subscription; `None` once the
    /// subscription has been replaced or unsubscribed.
    pub async fn next(&mut self) -> Option<RealtimeMessage> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        let mut shared = self.shared.lock().unwrap();
        // Only remove the entry if it is still ours; a later subscribe for
        // the same id may already have replaced it.
        let ours = shared
            .handlers
            .get(&self.request_id)
            .map_or(false, |handler| handler.token == self.token);
        if ours {
            shared.handlers.remove(&self.request_id);
        }
        self.receiver.close();
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcq_core::domain::RealtimePayload;
    use mcq_core::ports::{PortError, PortResult, RealtimeConnection};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    /// A scripted connection fed from the test through an mpsc channel.
    struct ScriptedConnection {
        inbound: mpsc::UnboundedReceiver<PortResult<RealtimeMessage>>,
    }

    #[async_trait]
    impl RealtimeConnection for ScriptedConnection {
        async fn recv(&mut self) -> Option<PortResult<RealtimeMessage>> {
            self.inbound.recv().await
        }

        async fn send(&mut self, _message: &RealtimeMessage) -> PortResult<()> {
            Ok(())
        }
    }

    /// Hands out one scripted connection, then refuses further dials.
    struct ScriptedTransport {
        connection: Mutex<Option<ScriptedConnection>>,
    }

    impl ScriptedTransport {
        fn single() -> (Arc<Self>, mpsc::UnboundedSender<PortResult<RealtimeMessage>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let transport = Arc::new(Self {
                connection: Mutex::new(Some(ScriptedConnection { inbound: rx })),
            });
            (transport, tx)
        }
    }

    #[async_trait]
    impl RealtimeTransport for ScriptedTransport {
        async fn connect(&self) -> PortResult<Box<dyn RealtimeConnection>> {
            match self.connection.lock().unwrap().take() {
                Some(conn) => Ok(Box::new(conn)),
                None => Err(PortError::Unexpected("endpoint unavailable".to_string())),
            }
        }
    }

    /// Always fails to connect; records the (virtual) time of each attempt.
    struct FailingTransport {
        attempts: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl RealtimeTransport for FailingTransport {
        async fn connect(&self) -> PortResult<Box<dyn RealtimeConnection>> {
            self.attempts.lock().unwrap().push(Instant::now());
            Err(PortError::Unexpected("connection refused".to_string()))
        }
    }

    fn progress_message(request_id: &str, progress: f32) -> RealtimeMessage {
        RealtimeMessage::McqProgress(RealtimePayload {
            request_id: request_id.to_string(),
            progress: Some(progress),
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn messages_route_to_the_matching_subscriber_in_order() {
        let (transport, feed) = ScriptedTransport::single();
        let channel = RealtimeChannel::new(transport);
        channel.start();

        let mut subscription = channel.subscribe("req-1");
        feed.send(Ok(progress_message("req-1", 10.0))).unwrap();
        feed.send(Ok(progress_message("other", 99.0))).unwrap(); // unknown id, dropped
        feed.send(Ok(progress_message("req-1", 20.0))).unwrap();

        let first = subscription.next().await.unwrap();
        assert_eq!(first.payload().progress, Some(10.0));
        let second = subscription.next().await.unwrap();
        assert_eq!(second.payload().progress, Some(20.0));
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribed_handlers_never_see_late_messages() {
        let (transport, feed) = ScriptedTransport::single();
        let channel = RealtimeChannel::new(transport);
        channel.start();

        let mut subscription = channel.subscribe("req-1");
        subscription.unsubscribe();
        subscription.unsubscribe(); // idempotent
        assert_eq!(channel.subscriber_count(), 0);

        feed.send(Ok(progress_message("req-1", 50.0))).unwrap();
        tokio::task::yield_now().await;
        assert!(subscription.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn a_second_subscribe_replaces_the_first_silently() {
        let (transport, feed) = ScriptedTransport::single();
        let channel = RealtimeChannel::new(transport);
        channel.start();

        let mut first = channel.subscribe("req-1");
        let mut second = channel.subscribe("req-1");
        assert_eq!(channel.subscriber_count(), 1);

        feed.send(Ok(progress_message("req-1", 75.0))).unwrap();
        assert!(second.next().await.is_some());
        assert!(first.next().await.is_none());

        // the replaced subscription's unsubscribe must not evict the live one
        first.unsubscribe();
        assert_eq!(channel.subscriber_count(), 1);
        drop(second);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_delays_double_until_the_attempt_cap() {
        let transport = Arc::new(FailingTransport {
            attempts: Mutex::new(Vec::new()),
        });
        let channel = RealtimeChannel::new(Arc::clone(&transport) as Arc<dyn RealtimeTransport>);
        channel.start();

        tokio::time::sleep(Duration::from_secs(120)).await;

        let attempts = transport.attempts.lock().unwrap().clone();
        // initial dial plus five backoff retries, then nothing
        assert_eq!(attempts.len(), 6);
        let gaps: Vec<u64> = attempts
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs())
            .collect();
        assert_eq!(gaps, vec![2, 4, 8, 16, 32]);
        assert_eq!(channel.state(), ConnectionState::Closed);

        // no further dials without a manual reconnect
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(transport.attempts.lock().unwrap().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_reconnect_dials_again_after_giving_up() {
        let transport = Arc::new(FailingTransport {
            attempts: Mutex::new(Vec::new()),
        });
        let channel = RealtimeChannel::with_max_attempts(
            Arc::clone(&transport) as Arc<dyn RealtimeTransport>,
            1,
        );
        channel.start();
        tokio::time::sleep(Duration::from_secs(10)).await;
        let after_giving_up = transport.attempts.lock().unwrap().len();
        assert_eq!(after_giving_up, 2);

        channel.reconnect();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(transport.attempts.lock().unwrap().len() > after_giving_up);
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_disconnected_is_a_no_op() {
        let transport = Arc::new(FailingTransport {
            attempts: Mutex::new(Vec::new()),
        });
        let channel = RealtimeChannel::new(transport);
        // never started; state is Closed and send must not panic or buffer
        channel.send(progress_message("req-1", 1.0));
        assert_eq!(channel.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn counter_resets_after_a_successful_connection() {
        // First dial succeeds, connection closes immediately, every retry
        // fails: the retries after the successful open must start from
        // attempt one again (2s gap), not continue the old progression.
        struct OnceThenFail {
            dials: AtomicUsize,
            attempts: Mutex<Vec<Instant>>,
        }

        #[async_trait]
        impl RealtimeTransport for OnceThenFail {
            async fn connect(&self) -> PortResult<Box<dyn RealtimeConnection>> {
                self.attempts.lock().unwrap().push(Instant::now());
                if self.dials.fetch_add(1, Ordering::SeqCst) == 0 {
                    let (_tx, rx) = mpsc::unbounded_channel();
                    // sender dropped: recv yields None immediately (closed)
                    Ok(Box::new(ScriptedConnection { inbound: rx }))
                } else {
                    Err(PortError::Unexpected("connection refused".to_string()))
                }
            }
        }

        let transport = Arc::new(OnceThenFail {
            dials: AtomicUsize::new(0),
            attempts: Mutex::new(Vec::new()),
        });
        let channel = RealtimeChannel::new(Arc::clone(&transport) as Arc<dyn RealtimeTransport>);
        channel.start();

        tokio::time::sleep(Duration::from_secs(10)).await;
        let attempts = transport.attempts.lock().unwrap().clone();
        assert!(attempts.len() >= 3);
        // open at t=0, closed at once; first retry 2s later, second 4s after that
        assert_eq!((attempts[1] - attempts[0]).as_secs(), 2);
    }
}
