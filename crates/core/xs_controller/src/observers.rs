//! The live observer set.
//!
//! The ingest loop is the single broadcaster; the WebSocket handlers own
//! their sockets and drain a channel each. An observer whose channel is
//! gone is dropped on the next broadcast. Strictly best-effort.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
pub struct ObserverRegistry {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: usize,
    observers: HashMap<usize, mpsc::UnboundedSender<String>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        ObserverRegistry::default()
    }

    /// Register an observer; returns its id and the channel to drain.
    pub fn add(&self) -> (usize, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.observers.insert(id, sender);
        debug!("Observer {id} connected ({} live)", inner.observers.len());
        (id, receiver)
    }

    pub fn remove(&self, id: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.observers.remove(&id);
        debug!("Observer {id} disconnected ({} live)", inner.observers.len());
    }

    /// Send a payload to every observer, dropping the dead ones.
    /// Returns the number of live observers after the broadcast.
    pub fn broadcast(&self, payload: &str) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner
            .observers
            .retain(|_, sender| sender.send(payload.to_string()).is_ok());
        inner.observers.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_live_observer_receives_the_broadcast() {
        let registry = ObserverRegistry::new();
        let (_id_a, mut a) = registry.add();
        let (_id_b, mut b) = registry.add();

        assert_eq!(registry.broadcast("payload"), 2);
        assert_eq!(a.recv().await.as_deref(), Some("payload"));
        assert_eq!(b.recv().await.as_deref(), Some("payload"));
    }

    #[tokio::test]
    async fn a_dead_observer_is_removed_within_one_broadcast() {
        let registry = ObserverRegistry::new();
        let (_id_a, a) = registry.add();
        let (_id_b, mut b) = registry.add();
        drop(a);

        assert_eq!(registry.broadcast("payload"), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(b.recv().await.as_deref(), Some("payload"));
    }

    #[tokio::test]
    async fn observers_only_see_payloads_after_they_registered() {
        let registry = ObserverRegistry::new();
        registry.broadcast("before");

        let (_id, mut receiver) = registry.add();
        registry.broadcast("after");

        assert_eq!(receiver.recv().await.as_deref(), Some("after"));
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn removal_is_idempotent() {
        let registry = ObserverRegistry::new();
        let (id, receiver) = registry.add();
        drop(receiver);

        registry.remove(id);
        registry.remove(id);
        assert!(registry.is_empty());
    }
}
