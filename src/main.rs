use clap::Parser;
use kuberelay::error::Result;
use kuberelay::http::{self, EventFormat};
use kuberelay::k8s::relay::config::{
    DEFAULT_SUBSCRIBER_BUFFER, INITIAL_BACKOFF_MILLIS, MAX_BACKOFF_SECONDS, WATCH_TIMEOUT_SECONDS,
};
use kuberelay::k8s::relay::{RelayConfig, WatchKind, kube_api};
use kuberelay::k8s::{USER_AGENT, client};
use kuberelay::relay_service::RelayService;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to serve the event streams on
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Origin allowed to open event streams from a browser; repeat for several, `*` for any
    #[arg(long = "allowed-origin", default_value = "*")]
    allowed_origins: Vec<String>,

    /// Workload kind to relay; repeat for several
    #[arg(short, long = "kind", value_enum, default_value = "deployments")]
    kinds: Vec<WatchKind>,

    /// Namespace to watch (all namespaces when omitted)
    #[arg(short, long)]
    namespace: Option<String>,

    /// Kubeconfig context to use instead of the inferred configuration
    #[arg(long)]
    context: Option<String>,

    /// Events a subscriber may fall behind by before it is disconnected
    #[arg(long, default_value_t = DEFAULT_SUBSCRIBER_BUFFER)]
    subscriber_buffer: usize,

    /// First reconnect delay after the cluster connection fails, in milliseconds
    #[arg(long, default_value_t = INITIAL_BACKOFF_MILLIS)]
    initial_backoff_ms: u64,

    /// Longest reconnect delay, in seconds
    #[arg(long, default_value_t = MAX_BACKOFF_SECONDS)]
    max_backoff_secs: u64,

    /// Encoding of each event's `data:` payload
    #[arg(long, value_enum, default_value_t = EventFormat::Json)]
    format: EventFormat,
}

impl Args {
    fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms.max(1)),
            max_backoff: Duration::from_secs(self.max_backoff_secs.max(1)),
            watch_timeout_secs: WATCH_TIMEOUT_SECONDS,
            subscriber_buffer: self.subscriber_buffer,
        }
    }
}

async fn shutdown_signal(relay: RelayService) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("❌ Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("❌ Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    relay.begin_shutdown();
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kuberelay=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let client = client::new(Some(USER_AGENT), args.context.as_deref())
        .await
        .inspect_err(|e| error!("❌ Failed to load Kubernetes configuration: {}", e))?;
    let server_version = client::probe(&client)
        .await
        .inspect_err(|e| error!("❌ Kubernetes API server unreachable: {}", e))?;
    info!("✅ Connected to Kubernetes API server {}", server_version);

    let config = args.relay_config();
    let kinds: BTreeSet<WatchKind> = args.kinds.iter().copied().collect();
    let apis = kinds
        .into_iter()
        .map(|kind| {
            (
                kind,
                kube_api::for_kind(
                    kind,
                    client.clone(),
                    args.namespace.as_deref(),
                    config.watch_timeout_secs,
                ),
            )
        })
        .collect();

    let relay = RelayService::start(apis, &config);
    let app = http::router(relay.clone(), args.format, &args.allowed_origins);

    let listener = TcpListener::bind(&args.listen).await?;
    info!("🚀 Starting server on {}...", args.listen);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(relay.clone()))
        .await;

    relay.shutdown().await;
    served?;
    Ok(())
}
