//! Matching decoded envelopes back to the requests that produced them.
//!
//! Envelopes whose id does not belong to the outstanding request, and
//! second copies of one that does, are logged and dropped. They never reach
//! the caller.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::error::RpcError;

use super::protocol::{parse_id, ResponseEnvelope};

/// Pick the envelope answering request `expected` out of a decoded body.
///
/// An error envelope with a `null` id is accepted when it is the only one:
/// servers answer that way when they could not read the request id at all.
/// If nothing matches, the response is treated as lost in transit.
pub(crate) fn take_matching(
    expected: u64,
    envelopes: Vec<ResponseEnvelope>,
) -> Result<Value, RpcError> {
    let total = envelopes.len();
    let mut matched: Option<Result<Value, RpcError>> = None;

    for envelope in envelopes {
        let id = parse_id(&envelope.id);
        let anonymous_error = total == 1 && envelope.id.is_null() && envelope.outcome.is_err();

        if id == Some(expected) || anonymous_error {
            if matched.is_some() {
                warn!(rpc.id = expected, "discarding duplicate JSON-RPC response");
                continue;
            }
            matched = Some(envelope.outcome);
        } else {
            warn!(
                rpc.id = expected,
                response_id = %envelope.id,
                "discarding JSON-RPC response with mismatched id"
            );
        }
    }

    matched.unwrap_or_else(|| {
        Err(RpcError::transport(format!(
            "no response matched request id {expected}"
        )))
    })
}

/// Order batch envelopes by the consecutive ids `start_id..start_id + count`.
///
/// A batch rejected as a whole comes back as a lone error envelope with a
/// `null` id; that error is returned for the entire batch. Items the server
/// never answered are reported individually as malformed.
pub(crate) fn order_batch(
    start_id: u64,
    count: usize,
    envelopes: Vec<ResponseEnvelope>,
) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
    if let [only] = envelopes.as_slice() {
        if only.id.is_null() {
            if let Err(err) = &only.outcome {
                return Err(err.clone());
            }
        }
    }

    let end_id = start_id + count as u64;
    let mut by_id: HashMap<u64, Result<Value, RpcError>> = HashMap::with_capacity(count);
    for envelope in envelopes {
        match parse_id(&envelope.id) {
            Some(id) if (start_id..end_id).contains(&id) => {
                if by_id.contains_key(&id) {
                    warn!(rpc.id = id, "discarding duplicate JSON-RPC batch item");
                    continue;
                }
                by_id.insert(id, envelope.outcome);
            }
            _ => {
                warn!(
                    rpc.batch_start_id = start_id,
                    rpc.batch_size = count,
                    response_id = %envelope.id,
                    "discarding JSON-RPC batch item with unexpected id"
                );
            }
        }
    }

    Ok((start_id..end_id)
        .map(|id| {
            by_id.remove(&id).unwrap_or_else(|| {
                Err(RpcError::Malformed(format!(
                    "missing JSON-RPC batch item id={id}"
                )))
            })
        })
        .collect())
}
