use dashmap::DashMap;
use uuid::Uuid;
use vdcgate_transport::ApiConnectionHandle;

/// Live connections of a server, keyed by a per-connection session id.
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, ApiConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry {
            connections: DashMap::new(),
        }
    }

    pub fn insert(&self, id: Uuid, connection: ApiConnectionHandle) {
        self.connections.insert(id, connection);
    }

    pub fn remove(&self, id: &Uuid) -> Option<ApiConnectionHandle> {
        self.connections.remove(id).map(|(_, v)| v)
    }

    /// Snapshot of all live connections.
    pub fn connections(&self) -> Vec<ApiConnectionHandle> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Ask every live connection to close after its pending output.
    pub fn close_all(&self) {
        for connection in self.connections() {
            connection.close_after_send();
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
