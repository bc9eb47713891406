use crate::srt::transport::SocketId;
use crossbeam_channel::{Receiver, Sender};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Client notifications raised by a [`ServerSink`](crate::srt::server_sink::ServerSink).
///
/// `Added` fires once per accepted connection, `Removed` once per terminated one. A
/// connection whose header replay failed yields both without ever becoming active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Added {
        id: SocketId,
        address: SocketAddr,
    },
    Removed {
        id: SocketId,
        address: SocketAddr,
    },
}

impl ClientEvent {
    pub fn id(&self) -> SocketId {
        match self {
            ClientEvent::Added { id, .. } | ClientEvent::Removed { id, .. } => *id,
        }
    }

    pub fn address(&self) -> SocketAddr {
        match self {
            ClientEvent::Added { address, .. } | ClientEvent::Removed { address, .. } => *address,
        }
    }
}

type Callback = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Fans client events out to channel subscribers and callbacks.
///
/// Emission is synchronous and never blocks: channels are unbounded and receivers that
/// went away are pruned on the next emit.
#[derive(Default)]
pub(crate) struct EventBus {
    senders: Mutex<Vec<Sender<ClientEvent>>>,
    callbacks: Mutex<Vec<Callback>>,
}

impl EventBus {
    pub(crate) fn subscribe(&self) -> Receiver<ClientEvent> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sender);
        receiver
    }

    pub(crate) fn on_event(&self, callback: Callback) {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|sender| sender.send(event).is_ok());

        // Clone out so a callback may subscribe without deadlocking
        let callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for callback in callbacks {
            callback(&event);
        }
    }

    pub(crate) fn added(&self, id: SocketId, address: SocketAddr) {
        self.emit(ClientEvent::Added { id, address });
    }

    /// Emits notifications collected under a lock, after that lock was released.
    pub(crate) fn emit_all(&self, events: impl IntoIterator<Item = ClientEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn addr() -> SocketAddr {
        "10.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn test_subscribers_receive_in_order() {
        let bus = EventBus::default();
        let rx = bus.subscribe();

        bus.added(SocketId(1), addr());
        bus.emit(ClientEvent::Removed { id: SocketId(1), address: addr() });

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                ClientEvent::Added { id: SocketId(1), address: addr() },
                ClientEvent::Removed { id: SocketId(1), address: addr() },
            ]
        );
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        drop(rx);
        let live = bus.subscribe();

        bus.added(SocketId(7), addr());

        assert_eq!(bus.senders.lock().unwrap().len(), 1);
        assert_eq!(live.try_iter().count(), 1);
    }

    #[test]
    fn test_callbacks_invoked() {
        let bus = EventBus::default();
        let removed = Arc::new(AtomicUsize::new(0));
        let counter = removed.clone();
        bus.on_event(Arc::new(move |event| {
            if matches!(event, ClientEvent::Removed { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        bus.added(SocketId(3), addr());
        bus.emit_all([ClientEvent::Removed { id: SocketId(3), address: addr() }]);

        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }
}
