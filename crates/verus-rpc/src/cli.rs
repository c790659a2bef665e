use std::path::PathBuf;

use clap::Parser;

/// verus-rpc: send one JSON-RPC call to a Verus daemon and print the result.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Full RPC URL (`http(s)://[user:pass@]host:port/path`). Overrides
    /// --rpc-host and --rpc-port.
    #[arg(long, env = "VERUS_RPC_URL")]
    pub rpc_url: Option<String>,

    /// RPC host. Falls back to `rpcconnect` from --conf, then 127.0.0.1.
    #[arg(long, env = "VERUS_RPC_HOST")]
    pub rpc_host: Option<String>,

    /// RPC port. Falls back to `rpcport` from --conf, then 27486.
    #[arg(long, env = "VERUS_RPC_PORT")]
    pub rpc_port: Option<u16>,

    /// RPC username (must be given together with --rpc-pass).
    #[arg(long, env = "VERUS_RPC_USER")]
    pub rpc_user: Option<String>,

    /// RPC password (must be given together with --rpc-user).
    #[arg(long, env = "VERUS_RPC_PASS")]
    pub rpc_pass: Option<String>,

    /// Daemon configuration file (e.g. VRSC.conf) to read rpcuser,
    /// rpcpassword, rpcport and rpcconnect from.
    #[arg(long, env = "VERUS_CONF")]
    pub conf: Option<PathBuf>,

    /// Per-attempt response timeout in seconds.
    #[arg(long, default_value = "30")]
    pub timeout_secs: u64,

    /// Total attempts for transport failures and timeouts.
    #[arg(long, default_value = "5")]
    pub max_attempts: usize,

    /// Backoff before the first retry, doubled on each further retry.
    #[arg(long, default_value = "200")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the backoff between retries.
    #[arg(long, default_value = "2000")]
    pub max_backoff_ms: u64,

    /// Treat the call as state-changing: never resend it automatically.
    #[arg(long)]
    pub mutating: bool,

    /// Send the call exactly once.
    #[arg(long)]
    pub no_retry: bool,

    /// Print JSON results on a single line.
    #[arg(long)]
    pub compact: bool,

    /// RPC method name, e.g. `getinfo`.
    pub method: String,

    /// Positional parameters. Each is parsed as JSON and passed as a plain
    /// string when that fails.
    #[arg(allow_hyphen_values = true)]
    pub params: Vec<String>,
}
