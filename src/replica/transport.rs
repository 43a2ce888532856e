use crate::replica::actor::ActorClient;
use crate::replica::participant::ParticipantId;
use crate::replica::wire::{AppendEntriesRequest, AppendEntriesResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// PeerTransport carries AppendEntries RPCs to other participants. The
/// network layer (HTTP, gRPC, ...) lives outside this crate; implementations
/// adapt it to this seam.
#[async_trait::async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    async fn append_entries(
        &self,
        target: &ParticipantId,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResult, TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer {0} is unreachable")]
    Unreachable(ParticipantId),

    #[error("rpc timed out")]
    Timeout,

    #[error("transport failure: {0}")]
    Other(String),
}

/// In-process transport: routes requests straight into the target's replica
/// event loop. Used by tests and single-process deployments.
#[derive(Default)]
pub struct LocalNetwork {
    routes: RwLock<HashMap<ParticipantId, ActorClient>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(LocalNetwork {
            routes: RwLock::new(HashMap::new()),
        })
    }

    pub fn register(&self, id: ParticipantId, client: ActorClient) {
        self.routes.write().insert(id, client);
    }

    pub fn deregister(&self, id: &ParticipantId) {
        self.routes.write().remove(id);
    }
}

#[async_trait::async_trait]
impl PeerTransport for LocalNetwork {
    async fn append_entries(
        &self,
        target: &ParticipantId,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResult, TransportError> {
        let client = {
            let routes = self.routes.read();
            routes.get(target).cloned()
        };
        match client {
            Some(client) => client
                .append_entries(request)
                .await
                .map_err(|_| TransportError::Unreachable(target.clone())),
            None => Err(TransportError::Unreachable(target.clone())),
        }
    }
}
