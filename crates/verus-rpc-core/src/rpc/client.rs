use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::{Endpoint, RpcClientOptions};
use crate::error::{CoreError, RpcError};

use super::correlation::{order_batch, take_matching};
use super::http_adapter::HttpTransport;
use super::protocol::{decode_body, encode_requests, JsonRpcRequest, ResponseEnvelope};
use super::retry::{run_with_retry, trace_awaiting, RetryPolicy};
use super::{RpcTransport, TransportReply};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-call policy overrides.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Force the mutating tag on or off. `None` consults
    /// [`RpcClientOptions::mutating_methods`].
    pub mutating: Option<bool>,
    /// Abandon the call (and any pending retry) once this token fires.
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    pub fn mutating(mut self, mutating: bool) -> Self {
        self.mutating = Some(mutating);
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// JSON-RPC client for a single node.
///
/// Every call gets a fresh correlation id per attempt, a bounded wait, and a
/// centralized classification of failures. Transport failures and timeouts
/// are retried with capped exponential backoff; remote errors, malformed
/// responses and calls tagged as mutating are not.
///
/// The client is `Send + Sync` and meant to be shared (e.g. in an `Arc`)
/// between concurrent callers.
pub struct RpcClient {
    transport: Arc<dyn RpcTransport>,
    endpoint: Endpoint,
    options: RpcClientOptions,
    limiter: Option<DirectRateLimiter>,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a client talking JSON-RPC over HTTP(S) to `endpoint`.
    pub fn new(endpoint: Endpoint, options: RpcClientOptions) -> Result<Self, CoreError> {
        options.validate()?;
        let transport = HttpTransport::new(&endpoint, &options)?;
        Self::with_transport(endpoint, options, Arc::new(transport))
    }

    /// Create a client over a caller-supplied transport.
    pub fn with_transport(
        endpoint: Endpoint,
        options: RpcClientOptions,
        transport: Arc<dyn RpcTransport>,
    ) -> Result<Self, CoreError> {
        options.validate()?;

        let limiter = match options.requests_per_second {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    CoreError::Config("requests_per_second must be at least 1".to_owned())
                })?;
                Some(RateLimiter::direct(Quota::per_second(limit)))
            }
        };

        Ok(Self {
            transport,
            endpoint,
            options,
            limiter,
            next_id: AtomicU64::new(initial_request_id()),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn options(&self) -> &RpcClientOptions {
        &self.options
    }

    /// Invoke `method` with positional `params` and return the node's
    /// `result` untouched.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, CoreError> {
        self.call_with(method, params, CallOptions::default()).await
    }

    /// [`call`](Self::call), then decode the payload into `T`. A payload that
    /// does not fit `T` is reported as a malformed response.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, CoreError> {
        let raw = self.call(method, params).await?;
        serde_json::from_value(raw).map_err(|e| {
            RpcError::Malformed(format!("unexpected `{method}` result shape: {e}")).into()
        })
    }

    pub async fn call_with(
        &self,
        method: &str,
        params: Vec<Value>,
        call_options: CallOptions,
    ) -> Result<Value, CoreError> {
        if method.trim().is_empty() {
            return Err(CoreError::InvalidRequest(
                "method name must not be empty".to_owned(),
            ));
        }

        let mutating = call_options
            .mutating
            .unwrap_or_else(|| self.options.is_mutating(method));
        let policy = self.policy(mutating);
        debug!(
            rpc.method = method,
            rpc.params = params.len(),
            mutating,
            "rpc call"
        );

        run_with_retry(policy, method, call_options.cancel.as_ref(), |_attempt| {
            self.attempt(method, &params)
        })
        .await
    }

    /// Send several calls in one HTTP round trip.
    ///
    /// Results come back in input order, one per call. A failure that hits
    /// the whole exchange (transport, timeout, undecodable body) is returned
    /// as the outer error; transport failures and timeouts are retried unless
    /// any call in the batch is mutating.
    pub async fn call_batch(
        &self,
        calls: &[(String, Vec<Value>)],
    ) -> Result<Vec<Result<Value, RpcError>>, CoreError> {
        self.call_batch_with(calls, CallOptions::default()).await
    }

    /// [`call_batch`](Self::call_batch) with a per-batch policy. `mutating`
    /// applies to the batch as a whole.
    pub async fn call_batch_with(
        &self,
        calls: &[(String, Vec<Value>)],
        call_options: CallOptions,
    ) -> Result<Vec<Result<Value, RpcError>>, CoreError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        if calls.iter().any(|(method, _)| method.trim().is_empty()) {
            return Err(CoreError::InvalidRequest(
                "method name must not be empty".to_owned(),
            ));
        }

        let mutating = call_options.mutating.unwrap_or_else(|| {
            calls
                .iter()
                .any(|(method, _)| self.options.is_mutating(method))
        });
        let policy = self.policy(mutating);
        debug!(rpc.batch_size = calls.len(), mutating, "rpc batch call");

        run_with_retry(policy, "batch", call_options.cancel.as_ref(), |_attempt| {
            self.attempt_batch(calls)
        })
        .await
    }

    fn policy(&self, mutating: bool) -> RetryPolicy {
        let policy = RetryPolicy::from_options(&self.options);
        if mutating {
            policy.once()
        } else {
            policy
        }
    }

    /// Atomically reserve `count` consecutive request IDs for batch calls.
    fn reserve_request_ids(&self, count: u64) -> u64 {
        self.next_id.fetch_add(count, Ordering::Relaxed)
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn attempt(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        self.wait_for_rate_limit().await;
        let id = self.reserve_request_ids(1);
        let request = encode_requests(&JsonRpcRequest::new(id, method, params))?;
        trace!(rpc.id = id, rpc.method = method, request = %request, "rpc request");

        let reply = self.exchange(method, id, &request).await?;
        let envelopes = classify_reply(reply)?;
        take_matching(id, envelopes)
    }

    async fn attempt_batch(
        &self,
        calls: &[(String, Vec<Value>)],
    ) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
        self.wait_for_rate_limit().await;
        let start_id = self.reserve_request_ids(calls.len() as u64);
        let batch: Vec<JsonRpcRequest<'_>> = calls
            .iter()
            .enumerate()
            .map(|(offset, (method, params))| {
                JsonRpcRequest::new(start_id + offset as u64, method, params)
            })
            .collect();
        let requests = encode_requests(&batch)?;

        let reply = self.exchange("batch", start_id, &requests).await?;
        let envelopes = classify_reply(reply)?;
        order_batch(start_id, calls.len(), envelopes)
    }

    async fn exchange(
        &self,
        label: &str,
        id: u64,
        request: &Value,
    ) -> Result<TransportReply, RpcError> {
        trace_awaiting(label, id);
        let after = self.options.request_timeout;
        let reply = timeout(after, self.transport.post(request))
            .await
            .map_err(|_| RpcError::Timeout { after })??;
        debug!(
            rpc.id = id,
            rpc.method = label,
            status = reply.status,
            body_len = reply.body.len(),
            "rpc response"
        );
        Ok(reply)
    }
}

/// Turn an HTTP reply into envelopes.
///
/// Nodes report RPC failures with HTTP 500 (or 404 for unknown methods) and a
/// regular JSON-RPC body, so the body decides first. Only when it is not a
/// JSON-RPC envelope does a non-2xx status become a transport failure.
fn classify_reply(reply: TransportReply) -> Result<Vec<ResponseEnvelope>, RpcError> {
    match decode_body(&reply.body) {
        Ok(envelopes) => Ok(envelopes),
        Err(_) if !reply.is_success() => Err(RpcError::http_status(reply.status, &reply.body)),
        Err(err) => Err(err),
    }
}

fn initial_request_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}
