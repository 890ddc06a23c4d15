//! Shared handle to the current transport.
//!
//! Reconnects swap the transport underneath the send pipeline, the tool
//! orchestrator, and the keepalive task without any of them holding a
//! stale reference. Sends while no transport is installed fail with
//! `TransportClosed`.

use std::sync::Arc;

use tokio::sync::RwLock;

use confab_core::{ClientError, ClientFrame, TransportSession};

/// Swappable slot holding the live transport session.
#[derive(Default)]
pub struct TransportSlot {
    inner: RwLock<Option<Arc<dyn TransportSession>>>,
}

impl TransportSlot {
    /// An empty slot.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Install (or clear) the live transport, returning the previous one.
    pub async fn replace(
        &self,
        transport: Option<Arc<dyn TransportSession>>,
    ) -> Option<Arc<dyn TransportSession>> {
        let mut guard = self.inner.write().await;
        std::mem::replace(&mut *guard, transport)
    }

    /// The current transport, if any.
    pub async fn current(&self) -> Option<Arc<dyn TransportSession>> {
        self.inner.read().await.clone()
    }

    /// Send one frame on the current transport.
    pub async fn send(&self, frame: ClientFrame) -> Result<(), ClientError> {
        let transport = self
            .current()
            .await
            .ok_or(ClientError::TransportClosed)?;
        transport.send(frame).await
    }
}
