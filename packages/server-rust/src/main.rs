//! corrlog binary: runs the demonstration server and the important-request
//! client side by side, sharing one root cancellation context.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use corrlog_core::{install_panic_capture, Carrier, Context, Level, LogSink};
use corrlog_server::client::{ClientConfig, ImportantClient};
use corrlog_server::network::{NetworkConfig, ServerModule};
use corrlog_server::service::{FaultPolicy, ImportantStore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "corrlog", about = "Correlated structured-logging demo service")]
struct Args {
    /// Bind address for the server.
    #[arg(long, env = "CORRLOG_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port the server listens on. 0 means OS-assigned.
    #[arg(long, env = "CORRLOG_PORT", default_value_t = 8081)]
    port: u16,

    /// Host the client connects to.
    #[arg(long, env = "CORRLOG_CONNECT_HOST", default_value = "127.0.0.1")]
    connect_host: String,

    /// Milliseconds between client requests.
    #[arg(long, env = "CORRLOG_TICK_MS", default_value_t = 2000)]
    tick_ms: u64,

    /// Minimum level emitted by the client and server loggers.
    #[arg(long, env = "CORRLOG_LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Abort roughly one important call in this many. 0 disables the fault.
    #[arg(long, env = "CORRLOG_FAULT_DENOMINATOR", default_value_t = 4)]
    fault_denominator: u32,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error running corrlog: {err:#}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    install_panic_capture();

    let root_token = CancellationToken::new();
    tokio::spawn(cancel_on_signal(root_token.clone()));

    let sink = LogSink::stderr();
    let root = Context::background().with_cancellation(root_token.clone());
    let server_ctx = root.with_logger(Carrier::new("server", args.log_level, sink.clone()));
    let client_ctx = root.with_logger(Carrier::new("client", args.log_level, sink));

    let fault = if args.fault_denominator == 0 {
        FaultPolicy::Never
    } else {
        FaultPolicy::Random {
            denominator: args.fault_denominator,
        }
    };

    let config = NetworkConfig {
        host: args.host,
        port: args.port,
        ..NetworkConfig::default()
    };
    let mut server = ServerModule::new(config, server_ctx, Arc::new(ImportantStore::new(fault)));
    let port = server.start().await.context("unable to start server")?;

    let client = ImportantClient::new(ClientConfig {
        server_host: args.connect_host,
        server_port: port,
        tick_interval: Duration::from_millis(args.tick_ms),
    });

    // Error-group semantics: the first failure cancels the root token so
    // the other half drains and exits, then both outcomes are surfaced.
    let server_token = root_token.clone();
    let client_token = root_token;
    let (server_outcome, client_outcome) = tokio::join!(
        async move {
            let outcome = server.serve().await;
            server_token.cancel();
            outcome.context("unable to listen and serve")
        },
        async move {
            let outcome = client.send_important_requests(&client_ctx).await;
            client_token.cancel();
            outcome.context("unable to make important requests")
        },
    );

    server_outcome?;
    client_outcome?;
    Ok(())
}

/// Cancels `token` on the first interrupt or terminate signal.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    token.cancel();
}
