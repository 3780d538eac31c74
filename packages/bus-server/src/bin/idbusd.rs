//! `idbusd`: publishes the identity responders on an in-process bus link and
//! serves method calls read as JSON lines from stdin.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use idbus_server::bus::{BusConfig, BusConnection, HandlerResult, LocalTransport};
use idbus_server::caller::{CachedCallerResolver, PeerCredentials};
use idbus_server::responder::{self, IdentityStore, InMemoryCache, ResponderConfig, UsersResponder};
use idbus_server::stdio::{render_reply, CallLine};
use idbus_server::telemetry::{self, LogFormat};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// Identity bus daemon.
#[derive(Parser, Debug)]
#[command(name = "idbusd", version, about = "Identity lookups over an object bus")]
struct Args {
    /// Log level filter, overridden by `RUST_LOG`.
    #[arg(long, env = "IDBUS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "IDBUS_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// JSON identity store to serve. Empty when omitted.
    #[arg(long, env = "IDBUS_USERS_FILE", value_name = "PATH")]
    users_file: Option<PathBuf>,

    #[arg(long, env = "IDBUS_MAX_IN_FLIGHT", default_value_t = 1000)]
    max_in_flight: usize,

    #[arg(long, env = "IDBUS_METHOD_TIMEOUT_MS", default_value_t = 30_000)]
    method_timeout_ms: u64,

    #[arg(long, env = "IDBUS_DRAIN_TIMEOUT_MS", default_value_t = 5_000)]
    drain_timeout_ms: u64,

    /// Extra user attributes exported through `extraAttributes`.
    #[arg(long, env = "IDBUS_EXTRA_ATTRIBUTES", value_delimiter = ',')]
    extra_attributes: Vec<String>,
}

impl Args {
    fn bus_config(&self) -> BusConfig {
        BusConfig {
            max_in_flight_requests: self.max_in_flight,
            method_timeout: Duration::from_millis(self.method_timeout_ms),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
            ..BusConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init(&args.log_level, args.log_format)?;

    let store = match &args.users_file {
        Some(path) => IdentityStore::load(path)?,
        None => {
            warn!("no identity store configured, serving an empty one");
            IdentityStore::default()
        }
    };

    let config = args.bus_config();
    let (transport, mut outbound) = LocalTransport::new();
    let credentials = Arc::new(PeerCredentials::new());
    let resolver = Arc::new(CachedCallerResolver::new(
        credentials.clone(),
        config.caller_cache_capacity,
    ));
    let conn = BusConnection::new(transport.clone(), resolver.clone(), config);

    let users = Arc::new(UsersResponder::new(
        Arc::new(InMemoryCache::new(store)),
        ResponderConfig {
            extra_attributes: args.extra_attributes.clone(),
            ..ResponderConfig::default()
        },
    ));
    responder::register(&conn, users).context("failed to publish users interfaces")?;
    conn.set_ready();
    info!(paths = ?conn.registered_paths(), "idbusd ready");

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = outbound.recv().await {
            let mut line = render_reply(&message).to_string();
            line.push('\n');
            if let Err(err) = stdout.write_all(line.as_bytes()).await {
                warn!(error = %err, "failed to write reply");
                break;
            }
            if let Err(err) = stdout.flush().await {
                warn!(error = %err, "failed to flush stdout");
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                None
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let call = match CallLine::parse(&line) {
            Ok(call) => call,
            Err(err) => {
                warn!(error = %err, "skipping malformed call line");
                continue;
            }
        };
        if let Some((sender, identity)) = call.credentials() {
            credentials.insert(sender, identity);
            resolver.invalidate(sender);
        }
        let message = match call.into_message() {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "skipping call with unencodable arguments");
                continue;
            }
        };
        if transport.deliver(&conn, message) == HandlerResult::NeedMemory {
            debug!("connection saturated, call refused");
        }
    }

    let drained = conn.shutdown(conn.config().drain_timeout).await;
    drop(conn);
    drop(transport);
    if let Err(err) = writer.await {
        warn!(error = %err, "reply writer task failed");
    }
    info!(drained, "idbusd stopped");
    Ok(())
}
