use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::RpcError;

use super::{RpcTransport, TransportReply};

type DelayFn = Box<dyn Fn(&Value) -> Duration + Send + Sync>;

/// One scripted reaction to a posted request.
pub enum Step {
    /// Answer with `result`, echoing the request id.
    Result(Value),
    /// Answer with a JSON-RPC error object, echoing the request id.
    RemoteError { code: i64, message: String },
    /// Answer with a result under a different id.
    MismatchedId(Value),
    /// Raw HTTP status and body.
    Http { status: u16, body: String },
    TransportError(String),
    /// Never answer.
    Hang,
    Delayed(Duration, Box<Step>),
}

/// A scripted JSON-RPC transport for testing. Replays steps in order and
/// records every request it was handed.
pub struct MockTransport {
    script: Mutex<VecDeque<Step>>,
    echo: Option<DelayFn>,
    requests: Mutex<Vec<Value>>,
}

impl MockTransport {
    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder {
            script: VecDeque::new(),
            echo: None,
        }
    }

    /// Every request posted so far, in order.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().expect("mock requests poisoned").clone()
    }

    pub fn attempts(&self) -> usize {
        self.requests.lock().expect("mock requests poisoned").len()
    }

    fn next_step(&self) -> Option<Step> {
        self.script.lock().expect("mock script poisoned").pop_front()
    }
}

pub struct MockTransportBuilder {
    script: VecDeque<Step>,
    echo: Option<DelayFn>,
}

impl MockTransportBuilder {
    pub fn then(mut self, step: Step) -> Self {
        self.script.push_back(step);
        self
    }

    pub fn then_result(self, result: Value) -> Self {
        self.then(Step::Result(result))
    }

    pub fn then_remote_error(self, code: i64, message: &str) -> Self {
        self.then(Step::RemoteError {
            code,
            message: message.to_owned(),
        })
    }

    pub fn then_http(self, status: u16, body: &str) -> Self {
        self.then(Step::Http {
            status,
            body: body.to_owned(),
        })
    }

    pub fn then_transport_error(self, message: &str) -> Self {
        self.then(Step::TransportError(message.to_owned()))
    }

    pub fn then_hang(self) -> Self {
        self.then(Step::Hang)
    }

    /// Once the script is exhausted, answer every request with
    /// `{"method": .., "params": ..}` after the delay `delay` picks for it.
    /// Batch items are answered in reverse order.
    pub fn echo_after(mut self, delay: impl Fn(&Value) -> Duration + Send + Sync + 'static) -> Self {
        self.echo = Some(Box::new(delay));
        self
    }

    pub fn build(self) -> MockTransport {
        MockTransport {
            script: Mutex::new(self.script),
            echo: self.echo,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    async fn post(&self, request: &Value) -> Result<TransportReply, RpcError> {
        self.requests
            .lock()
            .expect("mock requests poisoned")
            .push(request.clone());

        match self.next_step() {
            Some(step) => play(step, request).await,
            None => match &self.echo {
                Some(delay) => {
                    tokio::time::sleep(delay(request)).await;
                    Ok(TransportReply::ok(echo(request).to_string()))
                }
                None => Err(RpcError::transport("mock script exhausted")),
            },
        }
    }
}

async fn play(step: Step, request: &Value) -> Result<TransportReply, RpcError> {
    let id = request["id"].clone();
    match step {
        Step::Result(result) => Ok(reply(id, result, Value::Null)),
        Step::RemoteError { code, message } => Ok(TransportReply {
            status: 500,
            body: json!({
                "result": null,
                "error": { "code": code, "message": message },
                "id": id,
            })
            .to_string(),
        }),
        Step::MismatchedId(result) => {
            let other = id.as_u64().map(|n| json!(n.wrapping_add(1_000))).unwrap_or(json!(0));
            Ok(reply(other, result, Value::Null))
        }
        Step::Http { status, body } => Ok(TransportReply { status, body }),
        Step::TransportError(message) => Err(RpcError::transport(message)),
        Step::Hang => std::future::pending().await,
        Step::Delayed(delay, inner) => {
            tokio::time::sleep(delay).await;
            Box::pin(play(*inner, request)).await
        }
    }
}

/// Echo a single request, or every item of a batch in reverse order.
fn echo(request: &Value) -> Value {
    match request {
        Value::Array(items) => Value::Array(items.iter().rev().map(echo).collect()),
        single => json!({
            "result": { "method": single["method"], "params": single["params"] },
            "error": null,
            "id": single["id"],
        }),
    }
}

fn reply(id: Value, result: Value, error: Value) -> TransportReply {
    TransportReply::ok(json!({ "result": result, "error": error, "id": id }).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_script_in_order_and_records_requests() {
        let mock = MockTransport::builder()
            .then_result(json!(1))
            .then_http(503, "")
            .build();

        let first = mock
            .post(&json!({"id": 5, "method": "getinfo", "params": []}))
            .await
            .expect("scripted reply");
        assert!(first.body.contains("\"id\":5"));

        let second = mock
            .post(&json!({"id": 6, "method": "getinfo", "params": []}))
            .await
            .expect("scripted reply");
        assert_eq!(second.status, 503);

        let exhausted = mock
            .post(&json!({"id": 7, "method": "getinfo", "params": []}))
            .await;
        assert!(exhausted.is_err());
        assert_eq!(mock.attempts(), 3);
    }

    #[tokio::test]
    async fn echo_mode_returns_method_and_params() {
        let mock = MockTransport::builder()
            .echo_after(|_| Duration::ZERO)
            .build();
        let reply = mock
            .post(&json!({"id": 1, "method": "getcurrency", "params": ["VRSC"]}))
            .await
            .expect("echo reply");
        let body: Value = serde_json::from_str(&reply.body).expect("json body");
        assert_eq!(body["result"]["params"], json!(["VRSC"]));
        assert_eq!(body["id"], 1);
    }
}
