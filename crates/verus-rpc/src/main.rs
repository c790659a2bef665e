mod cli;
mod params;

use std::time::Duration;

use clap::Parser;
use eyre::{eyre, WrapErr};

use verus_rpc_core::config::{resolve_credentials, DEFAULT_RPC_PORT};
use verus_rpc_core::{
    CallOptions, CancellationToken, CoreError, DaemonConf, Endpoint, RpcClient, RpcClientOptions,
    RpcError,
};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    // Results go to stdout; logs must not mix with them.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let endpoint = resolve_endpoint(&args)?;
    let options = client_options(&args);
    let client = RpcClient::new(endpoint, options).context("build RPC client")?;
    tracing::debug!(endpoint = %client.endpoint(), method = %args.method, "sending rpc call");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted; abandoning call");
                cancel.cancel();
            }
        });
    }

    let mut call_options = CallOptions::default().cancel_on(cancel);
    if args.mutating {
        call_options = call_options.mutating(true);
    }

    let params = params::parse_params(&args.params);
    let result = client
        .call_with(&args.method, params, call_options)
        .await
        .map_err(|err| {
            let message = format_call_error(&client.endpoint().to_string(), &err);
            eyre!(message).wrap_err(format!("`{}` failed", args.method))
        })?;

    if let Some(rendered) = params::render_result(&result, args.compact) {
        println!("{rendered}");
    }

    Ok(())
}

/// Build the endpoint from `--rpc-url`, or from host and port with the conf
/// file filling in whatever was not given on the command line.
fn resolve_endpoint(args: &cli::Cli) -> eyre::Result<Endpoint> {
    let conf = args
        .conf
        .as_deref()
        .map(DaemonConf::from_file)
        .transpose()
        .context("load daemon conf file")?;

    if let Some(url) = &args.rpc_url {
        let endpoint = Endpoint::parse(url).context("parse --rpc-url")?;
        // Explicit flags beat credentials embedded in the URL, which beat
        // the conf file.
        let explicit =
            resolve_credentials(args.rpc_user.as_deref(), args.rpc_pass.as_deref(), None)?;
        return Ok(match explicit {
            Some(creds) => endpoint.with_credentials(Some(creds)),
            None if endpoint.credentials().is_some() => endpoint,
            None => {
                let from_conf = conf.as_ref().and_then(DaemonConf::credentials);
                endpoint.with_credentials(from_conf)
            }
        });
    }

    let credentials = resolve_credentials(
        args.rpc_user.as_deref(),
        args.rpc_pass.as_deref(),
        conf.as_ref(),
    )?;

    let host = args
        .rpc_host
        .clone()
        .or_else(|| conf.as_ref().and_then(|c| c.rpc_host.clone()))
        .unwrap_or_else(|| "127.0.0.1".to_owned());
    let port = args
        .rpc_port
        .or_else(|| conf.as_ref().and_then(|c| c.rpc_port))
        .unwrap_or(DEFAULT_RPC_PORT);

    Ok(Endpoint::new(host, port).with_credentials(credentials))
}

fn client_options(args: &cli::Cli) -> RpcClientOptions {
    RpcClientOptions {
        request_timeout: Duration::from_secs(args.timeout_secs),
        max_attempts: if args.no_retry { 1 } else { args.max_attempts },
        initial_backoff: Duration::from_millis(args.initial_backoff_ms),
        max_backoff: Duration::from_millis(args.max_backoff_ms),
        ..RpcClientOptions::default()
    }
}

fn format_call_error(endpoint: &str, err: &CoreError) -> String {
    let mut lines = Vec::new();

    match err.as_rpc() {
        Some(RpcError::Remote { code, message }) => {
            lines.push(format!("error code: {code}"));
            lines.push(format!("error message: {message}"));
            return lines.join("\n");
        }
        Some(rpc) => {
            lines.push(format!("RPC endpoint: {endpoint}"));
            lines.push(format!("{} error: {rpc}", rpc.kind()));
        }
        None => lines.push(err.to_string()),
    }

    let source_error = err.to_string();
    if let Some(RpcError::Transport {
        status: Some(status),
        ..
    }) = err.as_rpc()
    {
        match status {
            401 | 403 => lines.push(
                "hint: authentication failed; verify --rpc-user/--rpc-pass or rpcuser/rpcpassword in --conf"
                    .into(),
            ),
            404 => lines.push("hint: endpoint path is invalid; verify the full RPC URL".into()),
            _ => {}
        }
    } else if source_error.contains("dns error") || source_error.contains("failed to lookup") {
        lines.push(
            "hint: hostname resolution failed; verify the endpoint hostname and your DNS/network"
                .into(),
        );
    } else if source_error.contains("tls")
        || source_error.contains("certificate")
        || source_error.contains("SSL")
    {
        lines.push(
            "hint: TLS handshake failed; verify certificate trust and that the endpoint uses HTTPS"
                .into(),
        );
    } else if source_error.contains("Connection refused") {
        lines.push(
            "hint: nothing is listening; check that the daemon is running with -server and the RPC port"
                .into(),
        );
    } else if matches!(err.as_rpc(), Some(RpcError::Timeout { .. })) {
        lines.push(
            "hint: the node did not answer in time; it may still be syncing, try a larger --timeout-secs"
                .into(),
        );
    }

    lines.join("\n")
}
