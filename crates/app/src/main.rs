use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rollcall_api::AppState;
use rollcall_kubehub::KubeWorkloads;
use rollcall_notify::{Notifier, TelegramTransport};
use rollcall_ops::{Poller, RelayContext};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

mod settings;

use settings::{Cli, Settings};

fn init_tracing(json: bool) {
    let env = std::env::var("ROLLCALL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if json {
        fmt.json().init();
    } else {
        fmt.init();
    }
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("ROLLCALL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid ROLLCALL_METRICS_ADDR; expected host:port");
        }
    }
}

fn build_notifier(settings: &Settings) -> Notifier {
    let Some((token, chat)) = settings.telegram.as_ref() else {
        return Notifier::disabled();
    };
    match TelegramTransport::new(token, chat, settings.call_timeout) {
        Ok(transport) => Notifier::new(Arc::new(transport), settings.call_timeout),
        Err(e) => {
            warn!(error = %e, "telegram transport unavailable; notifications disabled");
            Notifier::disabled()
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received; shutting down"),
        _ = terminate => info!("SIGTERM received; shutting down"),
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    init_metrics();
    let settings = Settings::from_cli(cli)?;

    let registry = settings::load_registry(settings.targets.as_deref(), settings.match_mode)?;
    info!(aliases = registry.len(), targets = registry.targets().len(), mode = ?registry.mode(), "target table loaded");

    let client = rollcall_kubehub::connect(settings.kubeconfig.as_deref(), settings.call_timeout)
        .await
        .context("cluster credentials are required")?;
    rollcall_kubehub::probe(&client, settings.call_timeout).await;
    let workloads = Arc::new(KubeWorkloads::new(client, settings.call_timeout));

    let ctx = Arc::new(RelayContext::new(registry, workloads, build_notifier(&settings)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = Poller::new(ctx.clone(), settings.poller_config()).spawn(shutdown_rx);

    let app = rollcall_api::router(AppState::new(ctx, settings.poll_interval));
    let listener = TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;
    info!(addr = %settings.listen, "rollcall listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = poller.await {
        warn!(error = %e, "health poller task failed");
    }
    info!("rollcall stopped");
    Ok(())
}
