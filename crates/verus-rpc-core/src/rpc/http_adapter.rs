//! JSON-RPC over HTTP(S) using `reqwest`.
//!
//! One pooled `reqwest::Client` is shared by every call, so concurrent calls
//! reuse keep-alive connections to the node. Credentials are sent as HTTP
//! basic auth on each request.

use std::error::Error as _;

use async_trait::async_trait;
use reqwest::header;
use tracing::{debug, trace};

use crate::config::{Endpoint, RpcClientOptions};
use crate::error::{CoreError, RpcError};

use super::{RpcTransport, TransportReply};

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    auth: Option<(String, String)>,
}

impl HttpTransport {
    /// Build a transport for `endpoint`.
    ///
    /// No overall request timeout is configured on the `reqwest` client: the
    /// request bound is enforced by [`super::RpcClient`] so that it is
    /// classified as a timeout rather than a transport failure.
    pub fn new(endpoint: &Endpoint, options: &RpcClientOptions) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| CoreError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: endpoint.url(),
            auth: endpoint
                .credentials()
                .map(|creds| (creds.user().to_owned(), creds.password().to_owned())),
        })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn post(&self, request: &serde_json::Value) -> Result<TransportReply, RpcError> {
        let mut builder = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(request);
        if let Some((ref user, ref pass)) = self.auth {
            builder = builder.basic_auth(user, Some(pass));
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();

        let body = response.text().await.map_err(transport_error)?;
        debug!(url = %self.url, %status, body_len = body.len(), "http response");
        trace!(url = %self.url, body = %body, "http response body");

        Ok(TransportReply {
            status: status.as_u16(),
            body,
        })
    }
}

/// Flatten a `reqwest` error and its sources into one message so DNS, connect
/// and TLS causes survive into the error shown to the caller.
fn transport_error(err: reqwest::Error) -> RpcError {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    RpcError::transport(message)
}
