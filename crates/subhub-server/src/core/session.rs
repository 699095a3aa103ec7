//! The Session layer — per-socket state machine sitting between the
//! transport (the WebSocket split halves) and the Socket Controller.
//!
//! A session moves `Opening -> Active -> Closing -> Closed`. It owns a
//! single reusable timer that does double duty: while idle it measures
//! how long since the client was last heard from, and once that elapses
//! it flips roles to wait for a `pusher:pong` reply to the ping it just
//! sent. Two separate timers would work just as well, but the original
//! implementation this is modeled on deliberately shares one, and a
//! session only ever needs one pending deadline at a time, so a single
//! reusable timer is kept here too.
//!
//! A session can outlive its WebSocket transport briefly — `detach`
//! happens on socket close, `attach` on a later reconnect carrying the
//! same `socket_id` is not part of this protocol, so in practice
//! `detach` is terminal and immediately followed by `close`. The
//! attach/detach split itself comes from the original design and is
//! kept because it is what lets outbound frames buffer safely for the
//! brief window between a session being constructed and its outbound
//! task being spun up.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::message::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerRole {
    Idle,
    AwaitingPong,
}

/// Commands the Socket Controller feeds into a session's driver loop.
pub enum SessionSignal {
    /// Any inbound frame was observed — resets the idle clock.
    Activity,
    /// A `pusher:pong` arrived — cancels the pong wait, back to idle.
    PongReceived,
    /// Transport is gone; begin closing.
    Disconnected,
}

pub struct SessionConfig {
    pub activity_timeout: Duration,
    pub pong_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            activity_timeout: Duration::from_secs(120),
            pong_timeout: Duration::from_secs(30),
        }
    }
}

struct Inner {
    state: SessionState,
    receiver: Option<mpsc::UnboundedSender<Event>>,
    buffer: VecDeque<Event>,
}

/// Handle shared between the Socket Controller and the session's own
/// driver task. Cheaply cloneable (wrap in `Arc`); `id()` is this
/// session's `socket_id` and doubles as its Subscriber id in the
/// Subscription Index.
pub struct Session {
    id: String,
    inner: Mutex<Inner>,
    signal_tx: mpsc::UnboundedSender<SessionSignal>,
}

impl Session {
    /// Construct a session and spawn its driver task. Returns the
    /// session handle and the receiver end the caller should forward
    /// into the outbound WebSocket sink.
    pub fn spawn(id: String, cfg: SessionConfig) -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let session = std::sync::Arc::new(Self {
            id,
            inner: Mutex::new(Inner {
                state: SessionState::Opening,
                receiver: Some(out_tx),
                buffer: VecDeque::new(),
            }),
            signal_tx,
        });

        let driver = session.clone();
        tokio::spawn(async move { driver.run(cfg, signal_rx).await });

        (session, out_rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().expect("session poisoned").state
    }

    pub fn mark_active(&self) {
        let mut inner = self.inner.lock().expect("session poisoned");
        if inner.state == SessionState::Opening {
            inner.state = SessionState::Active;
        }
    }

    pub fn notify(&self, signal: SessionSignal) {
        let _ = self.signal_tx.send(signal);
    }

    /// Detach the outbound receiver (transport gone). Further sends are
    /// buffered; a session is not expected to be reattached in this
    /// protocol, so this is effectively the start of teardown.
    pub fn detach_receiver(&self) {
        let mut inner = self.inner.lock().expect("session poisoned");
        inner.receiver = None;
    }

    /// Send a frame to the client, buffering it if no transport is
    /// currently attached and flushing the buffer first if one just
    /// reattached.
    pub fn send(&self, event: Event) {
        let mut inner = self.inner.lock().expect("session poisoned");
        if inner.state == SessionState::Closed {
            return;
        }
        let inner = &mut *inner;
        match &inner.receiver {
            Some(tx) => {
                while let Some(buffered) = inner.buffer.pop_front() {
                    if tx.send(buffered).is_err() {
                        inner.receiver = None;
                        inner.buffer.push_back(event);
                        return;
                    }
                }
                if tx.send(event).is_err() {
                    inner.receiver = None;
                }
            }
            None => inner.buffer.push_back(event),
        }
    }

    fn transition_closing(&self) -> bool {
        let mut inner = self.inner.lock().expect("session poisoned");
        if inner.state == SessionState::Closed || inner.state == SessionState::Closing {
            return false;
        }
        inner.state = SessionState::Closing;
        true
    }

    fn transition_closed(&self) {
        let mut inner = self.inner.lock().expect("session poisoned");
        inner.state = SessionState::Closed;
        inner.receiver = None;
        inner.buffer.clear();
    }

    async fn run(self: std::sync::Arc<Self>, cfg: SessionConfig, mut signals: mpsc::UnboundedReceiver<SessionSignal>) {
        self.mark_active();

        let mut role = TimerRole::Idle;
        let mut deadline = Instant::now() + cfg.activity_timeout;

        loop {
            tokio::select! {
                signal = signals.recv() => {
                    match signal {
                        Some(SessionSignal::Activity) => {
                            role = TimerRole::Idle;
                            deadline = Instant::now() + cfg.activity_timeout;
                        }
                        Some(SessionSignal::PongReceived) => {
                            role = TimerRole::Idle;
                            deadline = Instant::now() + cfg.activity_timeout;
                        }
                        Some(SessionSignal::Disconnected) | None => {
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    match role {
                        TimerRole::Idle => {
                            self.send(Event::global("pusher:ping", serde_json::json!({})));
                            role = TimerRole::AwaitingPong;
                            deadline = Instant::now() + cfg.pong_timeout;
                        }
                        TimerRole::AwaitingPong => {
                            tracing::debug!(session_id = %self.id, "pong timeout, closing session");
                            break;
                        }
                    }
                }
            }
        }

        if self.transition_closing() {
            self.transition_closed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_buffers_until_receiver_attached_then_flushes() {
        let (session, mut rx) = Session::spawn("sock-1".into(), SessionConfig::default());
        session.send(Event::new("greeting", "room-1", serde_json::json!({"n": 1})));
        let first = rx.recv().await.expect("buffered event should flush through");
        assert_eq!(first.event, "greeting");
        session.notify(SessionSignal::Disconnected);
    }

    #[tokio::test]
    async fn detach_then_send_buffers_without_panicking() {
        let (session, rx) = Session::spawn("sock-2".into(), SessionConfig::default());
        drop(rx);
        session.detach_receiver();
        session.send(Event::new("ev", "room-1", serde_json::json!(null)));
        assert_eq!(session.state(), SessionState::Active);
        session.notify(SessionSignal::Disconnected);
    }

    /// S6 — with no receiver attached and no activity, the idle timer
    /// fires, flips into awaiting-pong, times out again with nobody
    /// there to reply, and the session ends up `Closed`; frames sent
    /// afterward are silently dropped rather than delivered.
    #[tokio::test]
    async fn idle_and_pong_timeout_close_the_session() {
        let cfg = SessionConfig {
            activity_timeout: Duration::from_millis(10),
            pong_timeout: Duration::from_millis(10),
        };
        let (session, rx) = Session::spawn("sock-3".into(), cfg);
        drop(rx);
        session.detach_receiver();

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(session.state(), SessionState::Closed);
        session.send(Event::new("late", "room-1", serde_json::json!(null)));
    }
}
