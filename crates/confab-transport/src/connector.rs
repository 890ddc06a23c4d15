//! Transport selection and the production connector.

use std::sync::Arc;

use async_trait::async_trait;
use confab_core::{ClientConfig, ClientError, TransportConnector, TransportSession};

use crate::credentials::CredentialResolver;
use crate::grpc::{DEFAULT_GRPC_ENDPOINT, GrpcSession};
use crate::ws::{DEFAULT_WS_ENDPOINT, WsSession};

/// Which wire protocol a session will use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// gRPC bidirectional stream of typed frames.
    BinaryBidi,
    /// WebSocket carrying UTF-8 JSON envelopes.
    WebSocket,
}

/// Apply the selection rule: WebSocket if and only if the caller asked for
/// it *and* the model is live-capable. Everything else uses binary bidi.
#[must_use]
pub fn select_transport(config: &ClientConfig) -> TransportKind {
    if config.enable_websocket && config.is_live_capable() {
        TransportKind::WebSocket
    } else {
        TransportKind::BinaryBidi
    }
}

/// Production [`TransportConnector`]: resolves credentials once and opens
/// whichever transport the selection rule picks.
pub struct ServiceConnector {
    resolver: CredentialResolver,
    grpc_endpoint: String,
    ws_endpoint: String,
}

impl ServiceConnector {
    /// A connector against the default service endpoints.
    #[must_use]
    pub fn new(resolver: CredentialResolver) -> Self {
        Self {
            resolver,
            grpc_endpoint: DEFAULT_GRPC_ENDPOINT.to_string(),
            ws_endpoint: DEFAULT_WS_ENDPOINT.to_string(),
        }
    }

    /// Override both service endpoints (tests, self-hosted gateways).
    #[must_use]
    pub fn with_endpoints(
        mut self,
        grpc_endpoint: impl Into<String>,
        ws_endpoint: impl Into<String>,
    ) -> Self {
        self.grpc_endpoint = grpc_endpoint.into();
        self.ws_endpoint = ws_endpoint.into();
        self
    }
}

#[async_trait]
impl TransportConnector for ServiceConnector {
    async fn open(&self, config: &ClientConfig) -> Result<Arc<dyn TransportSession>, ClientError> {
        let credentials = self.resolver.resolve();
        match select_transport(config) {
            TransportKind::WebSocket => {
                let session = WsSession::connect(&self.ws_endpoint, &credentials).await?;
                Ok(Arc::new(session))
            }
            TransportKind::BinaryBidi => {
                let session = GrpcSession::connect(&self.grpc_endpoint, &credentials).await?;
                Ok(Arc::new(session))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(model: &str, enable_websocket: bool) -> ClientConfig {
        ClientConfig {
            enable_websocket,
            ..ClientConfig::for_model(model)
        }
    }

    #[test]
    fn websocket_requires_opt_in_and_live_model() {
        assert_eq!(
            select_transport(&config("gemini-2.0-flash-live-001", true)),
            TransportKind::WebSocket
        );
        assert_eq!(
            select_transport(&config("gemini-2.0-flash-live-001", false)),
            TransportKind::BinaryBidi
        );
        assert_eq!(
            select_transport(&config("gemini-1.5-flash", true)),
            TransportKind::BinaryBidi
        );
    }

    #[test]
    fn selection_ignores_models_prefix_and_case() {
        assert_eq!(
            select_transport(&config("models/Gemini-2.0-Flash-LIVE-001", true)),
            TransportKind::WebSocket
        );
    }
}
