use std::{
    collections::BTreeMap,
    fmt,
    sync::Arc,
    thread::ThreadId,
};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub(crate) u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn{}", self.0)
    }
}

/// What the registry knows about a client, visible from any thread.
#[derive(Debug)]
pub struct ClientInfo {
    pub id: ClientId,
    pub desc: String,
    pub thread: ThreadId,
}

/// Every live client, for introspection. All access goes through one mutex.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<BTreeMap<ClientId, Arc<ClientInfo>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the client was already registered.
    pub fn register(&self, info: Arc<ClientInfo>) -> bool {
        let mut clients = self.clients.lock();
        if clients.contains_key(&info.id) {
            return false;
        }
        clients.insert(info.id, info);
        true
    }

    pub fn unregister(&self, id: ClientId) -> bool {
        self.clients.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Registered clients in id order.
    pub fn snapshot(&self) -> Vec<Arc<ClientInfo>> {
        self.clients.lock().values().cloned().collect()
    }
}
