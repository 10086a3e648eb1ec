/// One dashboard client connection
///
/// A session registers with the hub, then drives two loops over the split
/// WebSocket until either of them ends:
///
/// - the send loop drains the outbound queue and pings the client,
/// - the receive loop only watches for liveness (pongs, close, errors).
///
/// Whichever loop finishes first cancels the other. Both connection halves
/// are dropped with it, so the socket is released, and the session is then
/// unregistered. Sessions never become active again.

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use super::registry::{Frame, Hub, HubError, SessionHandle, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Outbound queue bound; a full queue gets the session evicted
    pub queue_capacity: usize,
    pub ping_interval: Duration,
    /// Read deadline, refreshed by every inbound frame
    pub pong_wait: Duration,
    /// Deadline for a single outbound write
    pub write_wait: Duration,
    pub max_message_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The hub closed the outbound queue (unregistered or evicted)
    QueueClosed,
    WriteFailed,
    WriteTimeout,
    /// Close frame received or stream ended
    PeerClosed,
    ReadFailed,
    /// Nothing received within the read deadline
    ReadTimeout,
    MessageTooLarge(usize),
}

pub struct Session {
    id: SessionId,
    hub: Hub,
    queue: mpsc::Receiver<Frame>,
    settings: SessionSettings,
    state: watch::Sender<SessionState>,
}

impl Session {
    /// Create the outbound queue and register with the hub
    pub async fn connect(hub: Hub, settings: SessionSettings) -> Result<Self, HubError> {
        let id = SessionId::next();
        let (sender, queue) = mpsc::channel(settings.queue_capacity);
        let (state, _) = watch::channel(SessionState::Connecting);

        let session = Self {
            id,
            hub,
            queue,
            settings,
            state,
        };

        session.hub.register(SessionHandle { id, queue: sender }).await?;
        session.transition(SessionState::Active);

        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Follow state changes, including the ones made while `run` owns the session
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Run both loops to completion and tear the session down
    pub async fn run<W, R, E>(mut self, sink: W, stream: R) -> SessionEnd
    where
        W: Sink<Message> + Unpin,
        W::Error: Display,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let settings = self.settings;

        let end = tokio::select! {
            end = send_loop(sink, &mut self.queue, settings) => end,
            end = receive_loop(stream, settings) => end,
        };

        self.transition(SessionState::Closing);
        debug!(session = %self.id, reason = ?end, "Session closing");

        if let Err(e) = self.hub.unregister(self.id).await {
            debug!(session = %self.id, "Unregister skipped: {}", e);
        }

        self.transition(SessionState::Closed);
        end
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        debug!(session = %self.id, from = ?previous, to = ?next, "Session state");
    }
}

async fn send_loop<W>(
    mut sink: W,
    queue: &mut mpsc::Receiver<Frame>,
    settings: SessionSettings,
) -> SessionEnd
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut keepalive = keepalive_timer(settings.ping_interval);

    loop {
        tokio::select! {
            frame = queue.recv() => match frame {
                Some(frame) => {
                    let message = Message::Text(frame.to_string());
                    if let Err(end) = write(&mut sink, message, settings.write_wait).await {
                        return end;
                    }
                }
                None => {
                    // Best effort, the connection is going away either way
                    let _ = write(&mut sink, Message::Close(None), settings.write_wait).await;
                    return SessionEnd::QueueClosed;
                }
            },
            _ = keepalive.tick() => {
                if let Err(end) = write(&mut sink, Message::Ping(Vec::new()), settings.write_wait).await {
                    return end;
                }
            }
        }
    }
}

fn keepalive_timer(period: Duration) -> time::Interval {
    // A stalled write postpones the next ping instead of queueing a burst
    let mut timer = time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn write<W>(sink: &mut W, message: Message, wait: Duration) -> Result<(), SessionEnd>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match time::timeout(wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!("WebSocket write failed: {}", e);
            Err(SessionEnd::WriteFailed)
        }
        Err(_) => Err(SessionEnd::WriteTimeout),
    }
}

async fn receive_loop<R, E>(mut stream: R, settings: SessionSettings) -> SessionEnd
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let message = match time::timeout(settings.pong_wait, stream.next()).await {
            Err(_) => return SessionEnd::ReadTimeout,
            Ok(None) => return SessionEnd::PeerClosed,
            Ok(Some(Err(e))) => {
                debug!("WebSocket read failed: {}", e);
                return SessionEnd::ReadFailed;
            }
            Ok(Some(Ok(message))) => message,
        };

        let size = match &message {
            Message::Close(_) => return SessionEnd::PeerClosed,
            Message::Text(text) => text.len(),
            Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => data.len(),
        };

        if size > settings.max_message_size {
            return SessionEnd::MessageTooLarge(size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SystemSnapshot;
    use crate::hub::Envelope;
    use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};

    type Inbound = Result<Message, axum::Error>;

    fn settings() -> SessionSettings {
        SessionSettings {
            queue_capacity: 8,
            ping_interval: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            max_message_size: 512,
        }
    }

    fn envelope() -> Envelope {
        Envelope::Stats(SystemSnapshot {
            cpu_usage: 5.0,
            cpu_cores: 1,
            memory_used: 1,
            memory_total: 1,
            memory_percent: 100.0,
            disk_used: 0,
            disk_total: 1,
            disk_percent: 0.0,
            uptime: 1,
            hostname: "h".to_string(),
            os: "linux".to_string(),
            platform: "arch".to_string(),
        })
    }

    async fn wait_for_count(hub: &Hub, expected: usize) {
        while hub.active_count() != expected {
            tokio::task::yield_now().await;
        }
    }

    fn socket() -> (
        UnboundedSender<Message>,
        UnboundedReceiver<Message>,
        UnboundedSender<Inbound>,
        UnboundedReceiver<Inbound>,
    ) {
        let (out_tx, out_rx) = unbounded();
        let (in_tx, in_rx) = unbounded();
        (out_tx, out_rx, in_tx, in_rx)
    }

    #[tokio::test]
    async fn test_connect_registers() {
        let hub = Hub::spawn();
        let session = Session::connect(hub.clone(), settings()).await.unwrap();
        assert_eq!(session.state(), SessionState::Active);
        wait_for_count(&hub, 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_pong_closes_session() {
        let hub = Hub::spawn();
        let session = Session::connect(hub.clone(), settings()).await.unwrap();
        wait_for_count(&hub, 1).await;

        let (sink, _outbound, _inbound, _) = socket();
        let state = session.watch_state();
        let started = Instant::now();
        let end = session
            .run(sink, futures::stream::pending::<Inbound>())
            .await;

        assert_eq!(end, SessionEnd::ReadTimeout);
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(*state.borrow(), SessionState::Closed);
        wait_for_count(&hub, 0).await;
    }

    #[tokio::test]
    async fn test_state_follows_lifecycle() {
        let hub = Hub::spawn();
        let session = Session::connect(hub.clone(), settings()).await.unwrap();
        let mut state = session.watch_state();
        assert_eq!(*state.borrow_and_update(), SessionState::Active);

        let (sink, _outbound, inbound, stream) = socket();
        let task = tokio::spawn(session.run(sink, stream));
        inbound.unbounded_send(Ok(Message::Close(None))).unwrap();

        state.changed().await.unwrap();
        let seen = *state.borrow_and_update();
        assert!(matches!(seen, SessionState::Closing | SessionState::Closed));

        assert_eq!(task.await.unwrap(), SessionEnd::PeerClosed);
        assert_eq!(*state.borrow(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_delays_after_stall() {
        let mut timer = keepalive_timer(Duration::from_secs(1));

        // Nobody ticks for several periods, as during a slow write
        time::sleep(Duration::from_millis(5500)).await;

        let started = Instant::now();
        timer.tick().await;
        assert_eq!(started.elapsed(), Duration::ZERO);

        timer.tick().await;
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pongs_keep_session_alive() {
        let hub = Hub::spawn();
        let session = Session::connect(hub.clone(), settings()).await.unwrap();
        let (sink, mut outbound, inbound, stream) = socket();

        let task = tokio::spawn(session.run(sink, stream));

        // First keepalive ping after 54s
        let ping = outbound.next().await.unwrap();
        assert!(matches!(ping, Message::Ping(_)));
        inbound.unbounded_send(Ok(Message::Pong(Vec::new()))).unwrap();

        // Well past the first read deadline, still registered
        time::sleep(Duration::from_secs(50)).await;
        assert!(!task.is_finished());
        assert_eq!(hub.active_count(), 1);

        drop(inbound);
        assert_eq!(task.await.unwrap(), SessionEnd::PeerClosed);
        wait_for_count(&hub, 0).await;
    }

    #[tokio::test]
    async fn test_broadcast_reaches_socket() {
        let hub = Hub::spawn();
        let session = Session::connect(hub.clone(), settings()).await.unwrap();
        let (sink, mut outbound, inbound, stream) = socket();
        let task = tokio::spawn(session.run(sink, stream));

        hub.broadcast(&envelope()).await.unwrap();

        match outbound.next().await.unwrap() {
            Message::Text(text) => {
                let decoded: Envelope = serde_json::from_str(&text).unwrap();
                assert_eq!(decoded, envelope());
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        inbound.unbounded_send(Ok(Message::Close(None))).unwrap();
        assert_eq!(task.await.unwrap(), SessionEnd::PeerClosed);
    }

    #[tokio::test]
    async fn test_unregister_sends_close_frame() {
        let hub = Hub::spawn();
        let session = Session::connect(hub.clone(), settings()).await.unwrap();
        let id = session.id();
        let (sink, mut outbound, _inbound, stream) = socket();
        let task = tokio::spawn(session.run(sink, stream));

        hub.unregister(id).await.unwrap();

        assert!(matches!(outbound.next().await.unwrap(), Message::Close(None)));
        assert_eq!(task.await.unwrap(), SessionEnd::QueueClosed);
    }

    #[tokio::test]
    async fn test_oversized_message_closes() {
        let hub = Hub::spawn();
        let session = Session::connect(hub.clone(), settings()).await.unwrap();
        let (sink, _outbound, inbound, stream) = socket();

        inbound
            .unbounded_send(Ok(Message::Text("x".repeat(513))))
            .unwrap();

        assert_eq!(session.run(sink, stream).await, SessionEnd::MessageTooLarge(513));
        wait_for_count(&hub, 0).await;
    }

    #[tokio::test]
    async fn test_read_error_closes() {
        let hub = Hub::spawn();
        let session = Session::connect(hub.clone(), settings()).await.unwrap();
        let (sink, _outbound, inbound, stream) = socket();

        let error = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        inbound.unbounded_send(Err(axum::Error::new(error))).unwrap();

        assert_eq!(session.run(sink, stream).await, SessionEnd::ReadFailed);
    }

    #[tokio::test]
    async fn test_write_failure_closes() {
        let hub = Hub::spawn();
        let session = Session::connect(hub.clone(), settings()).await.unwrap();
        let (sink, outbound, _inbound, stream) = socket();
        drop(outbound);

        let task = tokio::spawn(session.run(sink, stream));
        hub.broadcast(&envelope()).await.unwrap();

        assert_eq!(task.await.unwrap(), SessionEnd::WriteFailed);
        wait_for_count(&hub, 0).await;
    }
}
