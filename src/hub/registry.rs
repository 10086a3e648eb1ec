/// Session registry and broadcast fan-out
///
/// The registry is owned by a single actor task. `Hub` handles only send
/// commands to it, so membership changes can never race with an in-flight
/// broadcast. The active-session count is published through an atomic so
/// producers can read it without queueing behind the actor.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use super::envelope::Envelope;
use crate::utils::HUB_MAILBOX_CAPACITY;

/// A serialized envelope, shared by every session it is delivered to
pub type Frame = Arc<str>;

/// Identity of one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the registry holds for a session: its id and the write end of its
/// outbound queue. Dropping the handle closes the queue.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    pub queue: mpsc::Sender<Frame>,
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub has stopped")]
    Stopped,

    #[error("failed to encode {kind} envelope: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

enum Command {
    Register(SessionHandle),
    Unregister(SessionId),
    Broadcast(Frame),
}

/// Handle to the hub actor. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
    active: Arc<AtomicUsize>,
}

impl Hub {
    /// Spawn the coordination loop on the current runtime.
    ///
    /// The loop runs until every `Hub` and `Broadcaster` clone is dropped.
    pub fn spawn() -> Self {
        let (commands, mailbox) = mpsc::channel(HUB_MAILBOX_CAPACITY);
        let active = Arc::new(AtomicUsize::new(0));

        let actor = HubActor {
            sessions: HashMap::new(),
            active: Arc::clone(&active),
        };
        tokio::spawn(actor.run(mailbox));

        Self { commands, active }
    }

    /// Add a session to the registry
    pub async fn register(&self, session: SessionHandle) -> Result<(), HubError> {
        self.send(Command::Register(session)).await
    }

    /// Remove a session and close its queue. Unknown ids are ignored.
    pub async fn unregister(&self, id: SessionId) -> Result<(), HubError> {
        self.send(Command::Unregister(id)).await
    }

    /// Queue an envelope for every registered session
    pub async fn broadcast(&self, envelope: &Envelope) -> Result<(), HubError> {
        let text = serde_json::to_string(envelope).map_err(|source| HubError::Encode {
            kind: envelope.kind(),
            source,
        })?;
        self.send(Command::Broadcast(Frame::from(text))).await
    }

    /// Number of registered sessions, read without contacting the actor
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// The narrow capability handed to producers
    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster { hub: self.clone() }
    }

    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Stopped)
    }
}

/// Broadcast-only view of the hub: producers can publish and read the
/// session count, but cannot touch membership.
#[derive(Clone)]
pub struct Broadcaster {
    hub: Hub,
}

impl Broadcaster {
    pub async fn broadcast(&self, envelope: &Envelope) -> Result<(), HubError> {
        self.hub.broadcast(envelope).await
    }

    pub fn active_count(&self) -> usize {
        self.hub.active_count()
    }
}

struct HubActor {
    sessions: HashMap<SessionId, mpsc::Sender<Frame>>,
    active: Arc<AtomicUsize>,
}

impl HubActor {
    async fn run(mut self, mut mailbox: mpsc::Receiver<Command>) {
        while let Some(command) = mailbox.recv().await {
            match command {
                Command::Register(session) => self.register(session),
                Command::Unregister(id) => self.unregister(id),
                Command::Broadcast(frame) => self.broadcast(frame),
            }
        }

        debug!("Hub stopped, closing {} session queues", self.sessions.len());
    }

    fn register(&mut self, session: SessionHandle) {
        if self.sessions.contains_key(&session.id) {
            warn!(session = %session.id, "Session already registered, ignoring");
            return;
        }

        self.sessions.insert(session.id, session.queue);
        self.publish_count();
        info!(session = %session.id, "Client connected. Total clients: {}", self.sessions.len());
    }

    fn unregister(&mut self, id: SessionId) {
        if let Some(queue) = self.sessions.remove(&id) {
            self.publish_count();
            drop(queue);
            info!(session = %id, "Client disconnected. Total clients: {}", self.sessions.len());
        }
    }

    fn broadcast(&mut self, frame: Frame) {
        let mut evicted = Vec::new();

        for (id, queue) in &self.sessions {
            match queue.try_send(Arc::clone(&frame)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(session = %id, "Client queue full, evicting");
                    evicted.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(session = %id, "Client queue already closed, evicting");
                    evicted.push(*id);
                }
            }
        }

        for id in evicted {
            self.unregister(id);
        }
    }

    fn publish_count(&self) {
        self.active.store(self.sessions.len(), Ordering::Release);
    }
}
