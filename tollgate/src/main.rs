use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tollgate::approval::ApprovalTransport;
use tollgate::approval::terminal::TerminalTransport;
use tollgate::catalog::OpenApiCatalog;
use tollgate::mediate::Mediator;
use tollgate::policy::PolicyStore;
use tollgate::server;
use tollgate::server::AppState;
use tollgate::tls;
use tollgate::upstream::UpstreamClient;

/// A TLS-terminating forward proxy that mediates credential use through
/// human-in-the-loop approvals.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version)]
struct Opt {
    /// Path to the persisted configuration document.
    #[arg(long, env = "TOLLGATE_CONFIG", default_value = "tollgate.json")]
    config: PathBuf,

    /// Plaintext listener address.
    #[arg(long, default_value = "0.0.0.0:80")]
    listen: SocketAddr,

    /// TLS listener address.
    #[arg(long, default_value = "0.0.0.0:443")]
    tls_listen: SocketAddr,

    /// Directory of per-hostname leaf certificates (`<host>.crt` /
    /// `<host>.key`). Without it the TLS listener is disabled.
    #[arg(long, env = "TOLLGATE_CERT_DIR")]
    cert_dir: Option<PathBuf>,

    /// Seconds to wait for the operator before a prompt times out.
    #[arg(long, default_value_t = 240)]
    approval_timeout: u64,

    /// Run without an approval transport: every unmatched mediated request
    /// is rejected.
    #[arg(long)]
    no_approvals: bool,

    /// Log filter, e.g. `info` or `tollgate=debug`.
    #[arg(long, env = "TOLLGATE_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&opt.log).context("invalid log filter")?)
        .with_writer(std::io::stderr)
        .init();
    let _ = rustls::crypto::ring::default_provider().install_default();

    let store = Arc::new(
        PolicyStore::load(&opt.config)
            .with_context(|| format!("loading configuration from {}", opt.config.display()))?,
    );
    let catalog = Arc::new(OpenApiCatalog::load(&store.snapshot(), &reqwest::Client::new()).await);
    let transport: Option<Arc<dyn ApprovalTransport>> = if opt.no_approvals {
        None
    } else {
        Some(Arc::new(TerminalTransport::new(Duration::from_secs(
            opt.approval_timeout,
        ))))
    };
    let mediator = Arc::new(Mediator::new(Arc::clone(&store), transport, catalog));
    let upstream = Arc::new(UpstreamClient::new().context("building upstream client")?);
    let shutdown = CancellationToken::new();

    let mut listeners = tokio::task::JoinSet::new();

    let plain_state = Arc::new(AppState::new(
        Arc::clone(&mediator),
        Arc::clone(&store),
        Arc::clone(&upstream),
        "http",
        shutdown.clone(),
    ));
    let plain_listener = TcpListener::bind(opt.listen)
        .await
        .with_context(|| format!("binding {}", opt.listen))?;
    tracing::info!(addr = %opt.listen, "plaintext listener ready");
    listeners.spawn(server::run_plain(
        plain_listener,
        server::router(plain_state),
        shutdown.clone(),
    ));

    match opt.cert_dir {
        Some(cert_dir) => {
            let tls_state = Arc::new(AppState::new(
                Arc::clone(&mediator),
                Arc::clone(&store),
                Arc::clone(&upstream),
                "https",
                shutdown.clone(),
            ));
            let tls_listener = TcpListener::bind(opt.tls_listen)
                .await
                .with_context(|| format!("binding {}", opt.tls_listen))?;
            tracing::info!(addr = %opt.tls_listen, "TLS listener ready");
            listeners.spawn(server::run_tls(
                tls_listener,
                server::router(tls_state),
                tls::server_config(cert_dir),
                shutdown.clone(),
            ));
        }
        None => {
            tracing::warn!("no --cert-dir given; TLS listener disabled");
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
        Some(finished) = listeners.join_next() => {
            finished.context("listener task panicked")??;
        }
    }
    shutdown.cancel();
    while let Some(finished) = listeners.join_next().await {
        finished.context("listener task panicked")??;
    }
    Ok(())
}
