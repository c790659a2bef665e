//! Resilient JSON-RPC client core for Verus and other Bitcoin-family daemons.
//!
//! [`RpcClient::call`] takes a method name and positional parameters, and
//! returns the node's `result` or exactly one classified [`RpcError`].

pub mod config;
pub mod error;
pub mod rpc;

pub use config::{Credentials, DaemonConf, Endpoint, RpcClientOptions};
pub use error::{CoreError, ErrorKind, RpcError};
pub use rpc::{CallOptions, HttpTransport, RpcClient, RpcTransport, TransportReply};
pub use tokio_util::sync::CancellationToken;
