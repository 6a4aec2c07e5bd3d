//! The duplex transport seam.
//!
//! The engine does not define the wire encoding of the remote streaming
//! protocol; it consumes an opened connection through [`RealtimeTransport`]
//! and opens one through [`TransportConnector`] using the short-lived
//! credential issued at connect time.

use crate::error::Result;
use crate::events::{InboundEvent, OutboundMessage};
use async_trait::async_trait;
use futures::Stream;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;

/// An open duplex connection to the remote speech model.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Whether the connection is currently open.
    fn is_connected(&self) -> bool;

    /// Send an outbound message. Messages are delivered in call order.
    async fn send(&self, message: OutboundMessage) -> Result<()>;

    /// Receive the next inbound event.
    ///
    /// Returns `None` when the connection is closed.
    async fn next_event(&self) -> Option<Result<InboundEvent>>;

    /// Close the connection gracefully. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// A shared transport handle for the session and its worker tasks.
pub type BoxedTransport = Arc<dyn RealtimeTransport>;

/// Extension methods for [`RealtimeTransport`].
pub trait RealtimeTransportExt: RealtimeTransport {
    /// Adapt the event pull into a stream.
    fn events(&self) -> Pin<Box<dyn Stream<Item = Result<InboundEvent>> + Send + '_>>
    where
        Self: Sized,
    {
        Box::pin(futures::stream::unfold(self, |transport| async move {
            let event = transport.next_event().await?;
            Some((event, transport))
        }))
    }
}

impl<T: RealtimeTransport> RealtimeTransportExt for T {}

/// Opaque transport settings returned by the connect endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Endpoint to connect to, if the connector needs one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Model identifier to run the session against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Provider-specific options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// Factory for opening duplex connections.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open a connection using the issued access credential.
    async fn open(
        &self,
        credential: &SecretString,
        config: &TransportConfig,
    ) -> Result<BoxedTransport>;
}
