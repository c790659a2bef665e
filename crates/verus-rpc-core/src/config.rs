//! Endpoint description, client tuning knobs, and credential discovery.
//!
//! An [`Endpoint`] is fixed for the lifetime of a client. Credentials can be
//! given explicitly or read from the daemon's own `key=value` configuration
//! file (`VRSC.conf` and friends), which is where `verusd` keeps `rpcuser`,
//! `rpcpassword` and `rpcport`.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use reqwest::Url;

use crate::error::CoreError;

/// Default RPC port of a Verus mainnet daemon.
pub const DEFAULT_RPC_PORT: u16 = 27486;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: usize = 5;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;
const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 32;

/// Methods that change wallet or chain state. Resending one after a lost
/// response risks a duplicate submission, so they are never retried unless
/// the caller overrides the tag.
pub const DEFAULT_MUTATING_METHODS: &[&str] = &[
    "sendrawtransaction",
    "sendcurrency",
    "definecurrency",
    "registernamecommitment",
    "registeridentity",
    "updateidentity",
    "importprivkey",
    "sendtoaddress",
    "sendmany",
    "z_sendmany",
];

// ==============================================================================
// Endpoint
// ==============================================================================

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Network address plus credentials of a JSON-RPC node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    tls: bool,
    host: String,
    port: u16,
    path: String,
    credentials: Option<Credentials>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            tls: false,
            host: host.into(),
            port,
            path: "/".to_owned(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Parse `http(s)://[user:pass@]host[:port][/path]`.
    ///
    /// A URL without a port falls back to [`DEFAULT_RPC_PORT`] for `http` and
    /// 443 for `https`.
    pub fn parse(url: &str) -> Result<Self, CoreError> {
        let parsed = Url::parse(url).map_err(|e| {
            CoreError::Config(format!("invalid rpc url `{url}`: expected HTTP(S) URL ({e})"))
        })?;
        let tls = match parsed.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(CoreError::Config(format!(
                    "unsupported rpc url scheme `{other}`; expected http or https"
                )));
            }
        };
        let host = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| CoreError::Config(format!("rpc url `{url}` has no host")))?;
        let port = parsed
            .port()
            .unwrap_or(if tls { 443 } else { DEFAULT_RPC_PORT });

        let credentials = match (parsed.username(), parsed.password()) {
            ("", None) => None,
            (user, Some(pass)) if !user.is_empty() => Some(Credentials::new(
                decode_userinfo(user, "user")?,
                decode_userinfo(pass, "password")?,
            )),
            _ => {
                return Err(CoreError::Config(
                    "rpc url must carry both user and password, or neither".to_owned(),
                ));
            }
        };

        Ok(Self {
            tls,
            host: host.to_owned(),
            port,
            path: parsed.path().to_owned(),
            credentials,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// URL the transport posts to. Credentials travel as a basic-auth header,
    /// never inside the URL.
    pub fn url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("{scheme}://{host}:{}{}", self.port, self.path)
    }
}

/// `Url` keeps userinfo percent-encoded; basic auth needs the raw text.
fn decode_userinfo(raw: &str, part: &str) -> Result<String, CoreError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| CoreError::Config(format!("rpc url {part} is not valid UTF-8: {e}")))
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

// ==============================================================================
// Client Options
// ==============================================================================

#[derive(Debug, Clone)]
pub struct RpcClientOptions {
    /// Upper bound on a single attempt, from send until the body is read.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Total attempts per call, including the first one.
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub pool_max_idle_per_host: usize,
    /// Client-wide limit on outbound HTTP requests; batches count once.
    pub requests_per_second: Option<u32>,
    pub mutating_methods: HashSet<String>,
}

impl Default for RpcClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            requests_per_second: None,
            mutating_methods: DEFAULT_MUTATING_METHODS
                .iter()
                .map(|method| (*method).to_owned())
                .collect(),
        }
    }
}

impl RpcClientOptions {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.request_timeout.is_zero() {
            return Err(CoreError::Config(
                "request_timeout must be greater than 0".to_owned(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(CoreError::Config(
                "connect_timeout must be greater than 0".to_owned(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(CoreError::Config(
                "max_attempts must be at least 1".to_owned(),
            ));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(CoreError::Config(
                "max_backoff must not be smaller than initial_backoff".to_owned(),
            ));
        }
        if self.requests_per_second == Some(0) {
            return Err(CoreError::Config(
                "requests_per_second must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn is_mutating(&self, method: &str) -> bool {
        self.mutating_methods.contains(method)
    }
}

// ==============================================================================
// Daemon Configuration File
// ==============================================================================

/// RPC-related settings found in a daemon `.conf` file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DaemonConf {
    pub rpc_user: Option<String>,
    pub rpc_password: Option<String>,
    pub rpc_port: Option<u16>,
    pub rpc_host: Option<String>,
}

impl DaemonConf {
    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!(
                "failed to read daemon conf file {}: {e}",
                path.display()
            ))
        })?;
        Self::parse(&content)
    }

    /// Parse `key=value` lines. Unknown keys are ignored; for repeated keys
    /// the last occurrence wins.
    pub fn parse(content: &str) -> Result<Self, CoreError> {
        let mut conf = Self::default();
        for (idx, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "rpcuser" => conf.rpc_user = Some(value.to_owned()),
                "rpcpassword" => conf.rpc_password = Some(value.to_owned()),
                "rpcconnect" | "rpchost" => conf.rpc_host = Some(value.to_owned()),
                "rpcport" => {
                    let port = value.parse::<u16>().map_err(|e| {
                        CoreError::Config(format!(
                            "invalid rpcport `{value}` on line {}: {e}",
                            idx + 1
                        ))
                    })?;
                    conf.rpc_port = Some(port);
                }
                _ => {}
            }
        }
        Ok(conf)
    }

    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.rpc_user, &self.rpc_password) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some(Credentials::new(user.clone(), pass.clone()))
            }
            _ => None,
        }
    }
}

/// Pick the credential pair for a client.
///
/// Precedence:
/// 1. explicit `user` + `pass`
/// 2. `rpcuser` / `rpcpassword` from the daemon conf file
/// 3. no auth
pub fn resolve_credentials(
    user: Option<&str>,
    pass: Option<&str>,
    conf: Option<&DaemonConf>,
) -> Result<Option<Credentials>, CoreError> {
    match (user, pass) {
        (Some(u), Some(p)) => Ok(Some(Credentials::new(u, p))),
        (Some(_), None) | (None, Some(_)) => Err(CoreError::Config(
            "both rpc user and rpc pass must be set together".to_owned(),
        )),
        (None, None) => Ok(conf.and_then(DaemonConf::credentials)),
    }
}
