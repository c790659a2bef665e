use serde_json::{Map, Value};

use crate::error::RpcError;

/// Protocol version string sent with every request. Verus and the Bitcoin
/// Core family speak JSON-RPC 1.0 and always echo `result`, `error` and `id`.
pub(crate) const JSONRPC_VERSION: &str = "1.0";

#[derive(Debug, serde::Serialize)]
pub(crate) struct JsonRpcRequest<'a> {
    pub(crate) jsonrpc: &'static str,
    pub(crate) id: u64,
    pub(crate) method: &'a str,
    pub(crate) params: &'a [Value],
}

impl<'a> JsonRpcRequest<'a> {
    pub(crate) fn new(id: u64, method: &'a str, params: &'a [Value]) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

/// Serialize one request, or a batch of them, into the JSON body handed to
/// the transport.
pub(crate) fn encode_requests<T: serde::Serialize + ?Sized>(
    requests: &T,
) -> Result<Value, RpcError> {
    serde_json::to_value(requests)
        .map_err(|e| RpcError::Malformed(format!("encode JSON-RPC request: {e}")))
}

/// One decoded response envelope: the echoed id plus either a payload or the
/// remote failure it carried.
#[derive(Debug)]
pub(crate) struct ResponseEnvelope {
    pub(crate) id: Value,
    pub(crate) outcome: Result<Value, RpcError>,
}

/// Decode an HTTP body into one or more envelopes.
///
/// A single request is answered with an object, a batch with an array.
/// Anything else is a protocol violation.
pub(crate) fn decode_body(body: &str) -> Result<Vec<ResponseEnvelope>, RpcError> {
    let value: Value = serde_json::from_str(body).map_err(|e| {
        RpcError::Malformed(format!("decode JSON-RPC response: {e}; body={}", snippet(body)))
    })?;

    match value {
        Value::Object(map) => Ok(vec![decode_envelope(map)?]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => decode_envelope(map),
                other => Err(RpcError::Malformed(format!(
                    "batch response item is not an object: {other}"
                ))),
            })
            .collect(),
        other => Err(RpcError::Malformed(format!(
            "response is neither an object nor an array: {other}"
        ))),
    }
}

fn decode_envelope(mut map: Map<String, Value>) -> Result<ResponseEnvelope, RpcError> {
    let id = map
        .remove("id")
        .ok_or_else(|| RpcError::Malformed("response envelope has no id".to_owned()))?;
    let error = map.remove("error").filter(|err| !err.is_null());
    let result = map.remove("result");

    let outcome = match (error, result) {
        (Some(_), Some(result)) if !result.is_null() => {
            return Err(RpcError::Malformed(
                "response envelope carries both result and error".to_owned(),
            ));
        }
        (Some(err), _) => Err(parse_jsonrpc_error(err)),
        (None, Some(result)) => Ok(result),
        (None, None) => {
            return Err(RpcError::Malformed(
                "response envelope has neither result nor error".to_owned(),
            ));
        }
    };

    Ok(ResponseEnvelope { id, outcome })
}

/// Parse a JSON-RPC error value into a structured `RpcError`.
///
/// JSON-RPC errors have the shape `{"code": <int>, "message": <string>}`.
/// If the error value matches that shape, we produce a `Remote` error;
/// otherwise we fall back to `Malformed` with the raw JSON.
pub(crate) fn parse_jsonrpc_error(err: Value) -> RpcError {
    #[derive(serde::Deserialize)]
    struct JsonRpcError {
        code: i64,
        message: String,
    }

    match serde_json::from_value::<JsonRpcError>(err.clone()) {
        Ok(parsed) => RpcError::Remote {
            code: parsed.code,
            message: parsed.message,
        },
        Err(_) => RpcError::Malformed(format!("non-standard JSON-RPC error: {err}")),
    }
}

/// Read a response id back as the `u64` we sent. Some proxies stringify ids.
pub(crate) fn parse_id(id: &Value) -> Option<u64> {
    if let Some(n) = id.as_u64() {
        return Some(n);
    }
    id.as_str().and_then(|s| s.parse::<u64>().ok())
}

pub(crate) fn snippet(body: &str) -> String {
    const LIMIT: usize = 256;
    let mut out: String = body.chars().take(LIMIT).collect();
    if body.chars().count() > LIMIT {
        out.push('…');
    }
    out
}
