use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::status::ConnectionStatus;

/// Event kinds, for filtering subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Ready,
    NeedPairing,
    StatusChanged,
}

/// State changes emitted by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The link is open and both channels are resolved.
    Connected,
    /// The physical link dropped.
    Disconnected,
    /// Authentication succeeded; calls may proceed.
    Ready,
    /// Authentication failed; the device must be put in pairing mode.
    NeedPairing,
    /// Any of the status flags changed. Carries the new snapshot.
    StatusChanged(ConnectionStatus),
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Connected => EventKind::Connected,
            ClientEvent::Disconnected => EventKind::Disconnected,
            ClientEvent::Ready => EventKind::Ready,
            ClientEvent::NeedPairing => EventKind::NeedPairing,
            ClientEvent::StatusChanged(_) => EventKind::StatusChanged,
        }
    }
}

/// Handle returned by subscriptions, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

enum Sink {
    Callback(Handler),
    Channel(mpsc::UnboundedSender<ClientEvent>),
}

struct Subscriber {
    id: SubscriptionId,
    kind: Option<EventKind>,
    once: bool,
    sink: Sink,
}

impl Subscriber {
    fn wants(&self, kind: EventKind) -> bool {
        self.kind.is_none_or(|k| k == kind)
    }
}

/// An explicit subscriber list.
///
/// Handlers run on the emitting task after the list lock is released, so a
/// handler may subscribe or unsubscribe without deadlocking.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `handler` for every event of `kind`.
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&ClientEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add(Some(kind), false, Sink::Callback(Arc::new(handler)))
    }

    /// Call `handler` for every event.
    pub fn on_any(
        &self,
        handler: impl Fn(&ClientEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add(None, false, Sink::Callback(Arc::new(handler)))
    }

    /// Call `handler` for the next event of `kind` only.
    pub fn once(
        &self,
        kind: EventKind,
        handler: impl Fn(&ClientEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add(Some(kind), true, Sink::Callback(Arc::new(handler)))
    }

    /// Receive every event on a channel. The subscription ends when the
    /// receiver is dropped.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.add(None, false, Sink::Channel(tx));
        rx
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every interested subscriber.
    pub fn emit(&self, event: ClientEvent) {
        let kind = event.kind();
        let mut callbacks = Vec::new();
        {
            let mut subscribers = self.lock();
            subscribers.retain(|sub| {
                if !sub.wants(kind) {
                    return true;
                }
                match &sub.sink {
                    Sink::Callback(handler) => callbacks.push(Arc::clone(handler)),
                    Sink::Channel(tx) => {
                        if tx.send(event.clone()).is_err() {
                            return false;
                        }
                    }
                }
                !sub.once
            });
        }

        tracing::trace!(?event, handlers = callbacks.len(), "emit");
        for handler in callbacks {
            handler(&event);
        }
    }

    fn add(&self, kind: Option<EventKind>, once: bool, sink: Sink) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Subscriber {
            id,
            kind,
            once,
            sink,
        });
        id
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.len())
            .finish()
    }
}
