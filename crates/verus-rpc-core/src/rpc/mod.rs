//! JSON-RPC client core.
//!
//! Defines the [`RpcTransport`] seam, provides an HTTP implementation
//! ([`HttpTransport`]) and the [`RpcClient`] that layers correlation,
//! classification and retry on top of any transport, plus a scripted test
//! transport (`mock::MockTransport`).

mod client;
mod correlation;
mod http_adapter;
#[cfg(test)]
pub mod mock;
mod protocol;
mod retry;

pub use client::{CallOptions, RpcClient};
pub use http_adapter::HttpTransport;

use async_trait::async_trait;

use crate::error::RpcError;

/// Raw HTTP answer to one posted JSON-RPC body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReply {
    pub status: u16,
    pub body: String,
}

impl TransportReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Delivers a request envelope to the node and hands back whatever came back.
///
/// Implementations only move bytes: they report connection-level failures as
/// [`RpcError::Transport`] and leave decoding, correlation and retry to
/// [`RpcClient`]. They must be safe to call concurrently.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn post(&self, request: &serde_json::Value) -> Result<TransportReply, RpcError>;
}
