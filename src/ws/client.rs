//! Streaming client — connection lifecycle, subscriptions, dispatch.
//!
//! - One receive loop and one keep-alive loop per connection, both spawned
//!   under a session token that is a child of the client's shutdown token
//! - Exponential backoff reconnection with jitter after an abnormal close
//! - Subscription registry replayed after every successful handshake
//! - Non-blocking fan-out to per-subscriber queues and maintained books

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;

use crate::domain::orderbook::{BookUpdate, OrderBook, OrderBookConfig, OrderBookRegistry};
use crate::error::{WsError, WsResult};
use crate::shared::{Channel, MarketId};
use crate::ws::dispatch::{self, Inbound};
use crate::ws::queue::{MessageQueue, PushOutcome};
use crate::ws::subscriptions::{SubscribeOptions, Subscription, SubscriptionKey, SubscriptionRegistry};
use crate::ws::transport::{FrameSink, FrameStream, Transport, TransportFrame};
use crate::ws::{ConnectionEvent, ConnectionState, MessageOut, StreamMessage, WsConfig};

// ─── Session ─────────────────────────────────────────────────────────────────

/// One open transport connection.
struct Session {
    id: u64,
    sink: tokio::sync::Mutex<Box<dyn FrameSink>>,
    cancel: CancellationToken,
    pong: Notify,
    retired: AtomicBool,
}

impl Session {
    /// Mark the session finished. Only the first caller gets `true`.
    fn retire(&self) -> bool {
        !self.retired.swap(true, Ordering::SeqCst)
    }
}

// ─── Shared state ────────────────────────────────────────────────────────────

struct Inner {
    config: WsConfig,
    transport: Arc<dyn Transport>,
    state: AtomicU8,
    events: broadcast::Sender<ConnectionEvent>,
    registry: Arc<SubscriptionRegistry>,
    books: OrderBookRegistry,
    session: Mutex<Option<Arc<Session>>>,
    /// Serializes connect and reconnect attempts.
    connection_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    next_session: AtomicU64,
}

/// Streaming market-data client over a [`Transport`].
///
/// Dropping the client ends every subscription stream. Inside a runtime the
/// socket is closed in a background task bounded by `close_timeout`; call
/// [`shutdown`](Self::shutdown) to wait for the close instead.
pub struct StreamingClient {
    inner: Arc<Inner>,
}

impl StreamingClient {
    /// Create a client. Does not connect yet.
    pub fn new(config: WsConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_books(config, transport, OrderBookRegistry::new(OrderBookConfig::default()))
    }

    /// Create a client that feeds maintained books into `books`.
    pub fn with_books(
        config: WsConfig,
        transport: Arc<dyn Transport>,
        books: OrderBookRegistry,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                events,
                registry: Arc::new(SubscriptionRegistry::default()),
                books,
                session: Mutex::new(None),
                connection_lock: tokio::sync::Mutex::new(()),
                shutdown: CancellationToken::new(),
                next_session: AtomicU64::new(0),
            }),
        }
    }

    /// Native client over `tokio-tungstenite`.
    #[cfg(feature = "ws-native")]
    pub fn native(config: WsConfig) -> Self {
        Self::new(config, Arc::new(crate::ws::native::TungsteniteTransport))
    }

    pub fn config(&self) -> &WsConfig {
        &self.inner.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receive connection lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Books maintained by [`subscribe_book`](Self::subscribe_book).
    pub fn books(&self) -> &OrderBookRegistry {
        &self.inner.books
    }

    /// Open the transport and start the receive and keep-alive loops.
    ///
    /// A failed first connect leaves the client in `Failed` with no retry.
    /// Cancelling `cancel` aborts the handshake and leaves it `Disconnected`.
    /// Calling this from `Failed` or `Closed` starts over.
    pub async fn connect(&self, cancel: &CancellationToken) -> WsResult<()> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(WsError::ShutDown);
        }

        let _guard = tokio::select! {
            _ = cancel.cancelled() => return Err(WsError::Cancelled),
            guard = inner.connection_lock.lock() => guard,
        };
        if inner.state() == ConnectionState::Connected {
            return Ok(());
        }

        inner.set_state(ConnectionState::Connecting);
        match inner.open_session(cancel).await {
            Ok(()) => Ok(()),
            Err(WsError::Cancelled) => {
                // A disconnect during the handshake leaves the state `Closed`.
                inner.transition(&[ConnectionState::Connecting], ConnectionState::Disconnected);
                Err(WsError::Cancelled)
            }
            Err(e) => {
                tracing::error!(error = %e, url = %inner.config.url, "WebSocket connection failed");
                inner.transition(&[ConnectionState::Connecting], ConnectionState::Failed);
                Err(e)
            }
        }
    }

    /// Subscribe with the default queue settings.
    pub async fn subscribe(&self, channel: Channel, instrument: &str) -> WsResult<Subscription> {
        self.subscribe_with(channel, instrument, SubscribeOptions::default())
            .await
    }

    /// Subscribe to `channel` for `instrument` (`BASE-QUOTE` or a market id).
    ///
    /// Each call returns a fresh stream. The wire subscribe is sent only for
    /// the first subscriber of a key, and only while connected; otherwise it
    /// goes out on the next (re)connect.
    pub async fn subscribe_with(
        &self,
        channel: Channel,
        instrument: &str,
        options: SubscribeOptions,
    ) -> WsResult<Subscription> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(WsError::ShutDown);
        }

        let key = SubscriptionKey::new(channel, MarketId::from_symbol(instrument));
        let queue = Arc::new(MessageQueue::new(
            options.capacity.unwrap_or(inner.config.queue_capacity),
            options.overflow_policy.unwrap_or(inner.config.overflow_policy),
        ));
        let id = inner.registry.next_id();
        let is_new = inner.registry.attach(&key, id, Arc::clone(&queue));

        tracing::debug!(
            key = %key,
            subscriber = id,
            subscribers = inner.registry.subscriber_count(&key),
            is_new,
            "Subscribed"
        );
        if is_new {
            inner.send_subscribe(&key).await;
        }

        Ok(Subscription::new(key, id, queue, Arc::clone(&inner.registry)))
    }

    /// Maintain an order book for `instrument` instead of yielding raw frames.
    pub async fn subscribe_book(&self, instrument: &str) -> WsResult<OrderBook> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(WsError::ShutDown);
        }

        let key = SubscriptionKey::new(Channel::OrderBook, MarketId::from_symbol(instrument));
        let book = inner.books.get_or_create(&key.market_id);
        if inner.registry.maintain_book(&key) {
            inner.send_subscribe(&key).await;
        }
        Ok(book)
    }

    /// Deactivate a key and end every stream attached to it.
    ///
    /// Returns `false` if the key was not subscribed.
    pub async fn unsubscribe(&self, channel: Channel, instrument: &str) -> WsResult<bool> {
        let inner = &self.inner;
        let key = SubscriptionKey::new(channel, MarketId::from_symbol(instrument));
        let Some(queues) = inner.registry.remove(&key) else {
            return Ok(false);
        };
        for queue in &queues {
            queue.close();
        }
        tracing::debug!(key = %key, subscribers = queues.len(), "Unsubscribed");

        if inner.state() == ConnectionState::Connected {
            if let Err(e) = inner.send_current(&MessageOut::unsubscribe(&key)).await {
                tracing::warn!(key = %key, error = %e, "Failed to send unsubscribe");
            }
        }
        Ok(true)
    }

    pub fn is_subscribed(&self, channel: Channel, instrument: &str) -> bool {
        let key = SubscriptionKey::new(channel, MarketId::from_symbol(instrument));
        self.inner.registry.contains(&key)
    }

    /// Active subscription keys.
    pub fn subscriptions(&self) -> Vec<SubscriptionKey> {
        self.inner.registry.active_keys()
    }

    /// Close the connection on the caller's behalf. Subscriptions stay
    /// registered and are replayed on the next `connect`.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        let session = {
            let mut current = inner.session.lock();
            inner.set_state(ConnectionState::Closed);
            current.take()
        };
        if let Some(session) = session {
            session.retire();
            session.cancel.cancel();
            inner.close_gracefully(&session).await;
        }
    }

    /// Stop everything: cancel both loops, end every subscription stream,
    /// and attempt one graceful close.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.disconnect().await;
        let closed = self.inner.registry.close_all_queues();
        tracing::info!(closed, "Streaming client shut down");
    }
}

impl Drop for StreamingClient {
    fn drop(&mut self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        inner.registry.close_all_queues();

        let session = {
            let mut current = inner.session.lock();
            inner.set_state(ConnectionState::Closed);
            current.take()
        };
        let Some(session) = session else { return };
        session.retire();

        // Outside a runtime the socket is simply dropped.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = Arc::clone(inner);
            handle.spawn(async move { inner.close_gracefully(&session).await });
        }
    }
}

// ─── Connection management ───────────────────────────────────────────────────

impl Inner {
    fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, to: ConnectionState) {
        let from = ConnectionState::from(self.state.swap(to as u8, Ordering::SeqCst));
        self.state_changed(from, to);
    }

    /// Move to `to` only if the current state is one of `from`.
    fn transition(&self, from: &[ConnectionState], to: ConnectionState) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            let state = ConnectionState::from(current);
            if !from.contains(&state) {
                return false;
            }
            match self
                .state
                .compare_exchange(current, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => {
                    self.state_changed(state, to);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn state_changed(&self, from: ConnectionState, to: ConnectionState) {
        if from != to {
            tracing::debug!(%from, %to, "Connection state changed");
            let _ = self.events.send(ConnectionEvent::StateChanged { from, to });
        }
    }

    /// Handshake, install the session, spawn its loops, and resubscribe.
    async fn open_session(self: &Arc<Self>, cancel: &CancellationToken) -> WsResult<()> {
        let timeout = self.config.connect_timeout;
        let handshake = self.transport.connect(&self.config.url, cancel);

        let (sink, stream) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WsError::Cancelled),
            _ = self.shutdown.cancelled() => return Err(WsError::ShutDown),
            result = tokio::time::timeout(timeout, handshake) => {
                result.map_err(|_| WsError::Timeout(timeout))??
            }
        };

        let session = Arc::new(Session {
            id: self.next_session.fetch_add(1, Ordering::Relaxed) + 1,
            sink: tokio::sync::Mutex::new(sink),
            cancel: self.shutdown.child_token(),
            pong: Notify::new(),
            retired: AtomicBool::new(false),
        });

        // Install and go `Connected` in one step under the session lock, so a
        // disconnect during the handshake wins.
        let installed = {
            let mut current = self.session.lock();
            let installed = self.transition(
                &[ConnectionState::Connecting, ConnectionState::Reconnecting],
                ConnectionState::Connected,
            );
            if installed {
                *current = Some(Arc::clone(&session));
            }
            installed
        };
        if !installed {
            session.retire();
            self.close_gracefully(&session).await;
            return Err(WsError::Cancelled);
        }
        tracing::info!(url = %self.config.url, session = session.id, "WebSocket connected");

        tokio::spawn(Arc::clone(self).receive_loop(Arc::clone(&session), stream));
        tokio::spawn(Arc::clone(self).keepalive_loop(Arc::clone(&session)));

        self.resubscribe(&session).await;
        Ok(())
    }

    /// Retire `session` and, unless the caller closed it, start reconnecting.
    fn connection_lost(self: &Arc<Self>, session: &Arc<Session>, reason: &str) {
        if !session.retire() {
            return;
        }
        session.cancel.cancel();

        if self.shutdown.is_cancelled() || self.state() == ConnectionState::Closed {
            return;
        }
        tracing::warn!(session = session.id, reason, "Connection lost");

        let inner = Arc::clone(self);
        let lost = session.id;
        tokio::spawn(async move { inner.reconnect_loop(lost).await });
    }

    async fn reconnect_loop(self: Arc<Self>, lost_session: u64) {
        let _guard = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            guard = self.connection_lock.lock() => guard,
        };

        {
            let mut current = self.session.lock();
            if current.as_ref().is_some_and(|s| s.id != lost_session) {
                // Someone already reconnected.
                return;
            }
            current.take();
        }
        if !self.transition(&[ConnectionState::Connected], ConnectionState::Reconnecting) {
            return;
        }
        let max_attempts = self.config.max_reconnect_attempts;

        for attempt in 1..=max_attempts {
            let delay = self.config.reconnect_delay(attempt);
            let _ = self.events.send(ConnectionEvent::Reconnecting { attempt, delay });
            tracing::info!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if self.state() == ConnectionState::Closed {
                return;
            }

            match self.open_session(&self.shutdown).await {
                Ok(()) => {
                    tracing::info!(attempt, "Reconnected");
                    return;
                }
                Err(WsError::ShutDown) => return,
                Err(WsError::Cancelled) if self.state() == ConnectionState::Closed => return,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                }
            }
        }

        if !self.transition(&[ConnectionState::Reconnecting], ConnectionState::Failed) {
            // Disconnected while the last attempt was in flight.
            return;
        }
        tracing::error!(attempts = max_attempts, "Reconnect attempts exhausted");
        let _ = self.events.send(ConnectionEvent::Failed {
            attempts: max_attempts,
        });
        self.registry.close_all_queues();
    }

    async fn close_gracefully(&self, session: &Session) {
        let close = async {
            let mut sink = session.sink.lock().await;
            sink.close().await
        };
        match tokio::time::timeout(self.config.close_timeout, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "Close handshake failed"),
            Err(_) => tracing::debug!("Close handshake timed out"),
        }
    }

    // ─── Sending ─────────────────────────────────────────────────────────────

    async fn send_on(&self, session: &Session, msg: &MessageOut) -> WsResult<()> {
        let text = serde_json::to_string(msg).map_err(|e| WsError::Protocol(e.to_string()))?;
        let mut sink = session.sink.lock().await;
        tokio::select! {
            _ = session.cancel.cancelled() => Err(WsError::Cancelled),
            result = sink.send(text) => result,
        }
    }

    async fn send_current(&self, msg: &MessageOut) -> WsResult<()> {
        let session = self.session.lock().clone();
        match session {
            Some(session) => self.send_on(&session, msg).await,
            None => Err(WsError::NotConnected),
        }
    }

    async fn send_subscribe(&self, key: &SubscriptionKey) {
        if self.state() != ConnectionState::Connected {
            return;
        }
        let msg = MessageOut::subscribe(key, self.config.orderbook_limit);
        if let Err(e) = self.send_current(&msg).await {
            // The key is registered; the next handshake replays it.
            tracing::warn!(key = %key, error = %e, "Failed to send subscribe");
        }
    }

    async fn resubscribe(&self, session: &Session) {
        let keys = self.registry.active_keys();
        if keys.is_empty() {
            return;
        }
        tracing::info!(count = keys.len(), "Resubscribing");
        for key in &keys {
            let msg = MessageOut::subscribe(key, self.config.orderbook_limit);
            if let Err(e) = self.send_on(session, &msg).await {
                tracing::warn!(key = %key, error = %e, "Failed to resubscribe");
                return;
            }
        }
    }

    // ─── Background loops ────────────────────────────────────────────────────

    async fn receive_loop(self: Arc<Self>, session: Arc<Session>, mut stream: Box<dyn FrameStream>) {
        loop {
            let frame = tokio::select! {
                _ = session.cancel.cancelled() => return,
                frame = stream.next_frame() => frame,
            };

            match frame {
                Some(Ok(TransportFrame::Text(text))) => self.dispatch(&session, &text),
                Some(Ok(TransportFrame::Close { code, reason })) => {
                    tracing::info!(code = ?code, reason = %reason, "Server closed connection");
                    self.connection_lost(&session, "server close");
                    return;
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "WebSocket error");
                    self.connection_lost(&session, "transport error");
                    return;
                }
                None => {
                    self.connection_lost(&session, "stream ended");
                    return;
                }
            }
        }
    }

    async fn keepalive_loop(self: Arc<Self>, session: Arc<Session>) {
        let interval = self.config.ping_interval;
        let pong_timeout = self.config.pong_timeout;

        loop {
            tokio::select! {
                _ = session.cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }

            if let Err(e) = self.send_on(&session, &MessageOut::ping()).await {
                if !session.cancel.is_cancelled() {
                    tracing::warn!(error = %e, "Failed to send ping");
                    self.connection_lost(&session, "ping failed");
                }
                return;
            }

            tokio::select! {
                _ = session.cancel.cancelled() => return,
                _ = session.pong.notified() => {}
                _ = tokio::time::sleep(pong_timeout) => {
                    tracing::warn!(timeout_ms = pong_timeout.as_millis() as u64, "Pong timeout");
                    self.connection_lost(&session, "pong timeout");
                    return;
                }
            }
        }
    }

    // ─── Dispatch ────────────────────────────────────────────────────────────

    fn dispatch(&self, session: &Session, text: &str) {
        match dispatch::decode(text) {
            Inbound::Data(message) => self.route(message),
            Inbound::Pong => session.pong.notify_one(),
            Inbound::Ack { market_id, name } => {
                tracing::debug!(market_id = %market_id, channel = %name, "Subscription acknowledged");
            }
            Inbound::Error(message) => {
                tracing::warn!(message = %message, "Server error frame");
            }
            Inbound::Unknown(reason) => {
                tracing::warn!(reason = %reason, "Dropping unrecognized frame");
            }
        }
    }

    fn route(&self, message: StreamMessage) {
        let key = message.key();
        let Some(route) = self.registry.route(&key) else {
            tracing::debug!(key = %key, "No subscription for frame");
            return;
        };

        if route.maintain_book {
            if let StreamMessage::OrderBook { market_id, data, .. } = &message {
                let update = BookUpdate::from(data.clone());
                if !self.books.apply_update(market_id, &update) {
                    tracing::debug!(market_id = %market_id, "Orderbook update not applied");
                }
            }
        }

        for queue in &route.queues {
            if queue.push(message.clone()) == PushOutcome::Dropped {
                tracing::debug!(key = %key, dropped = queue.dropped(), "Subscriber queue overflow");
            }
        }
    }
}
