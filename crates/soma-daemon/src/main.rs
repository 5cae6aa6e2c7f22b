mod boot;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use soma_config::load_config;
use soma_keeper::{EyeNotifier, ForestCustodian, GrimReaper, GuidePost, HandlerMap, WorkflowEngine};
use soma_store::PostgresStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// SOMA configuration-management daemon.
#[derive(Debug, Parser)]
#[command(name = "somad", version)]
struct Args {
    /// Path to the configuration file.
    #[arg(long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false);
    if config.environment == "production" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(environment = %config.environment, readonly = config.readonly, "somad starting");

    let store = Arc::new(
        PostgresStore::connect(
            &config.database.url(),
            Duration::from_secs(config.database.timeout_sec),
        )
        .await
        .context("connecting to the database")?,
    );

    let perm = Arc::new(boot::build_permission_cache(store.as_ref()).await?);
    let supervisor = Arc::new(boot::build_supervisor(store.clone(), &config)?);
    supervisor.load().await.context("loading supervisor state")?;

    let notifier = match (&config.eye, &config.soma_address) {
        (Some(eye), Some(address)) => {
            Some(EyeNotifier::new(eye.address.clone(), address, eye.timeout_ms)?)
        }
        (Some(_), None) => {
            warn!("eye configured without soma.address, notifications disabled");
            None
        }
        _ => None,
    };

    let handlers = Arc::new(HandlerMap::new());
    let reaper = Arc::new(GrimReaper::new());
    let workflow = Arc::new(WorkflowEngine::new(store.clone(), notifier));
    let custodian = Arc::new(ForestCustodian::new(
        store.clone(),
        handlers.clone(),
        workflow.clone(),
        reaper.clone(),
    ));
    custodian
        .boot_all()
        .await
        .map_err(|e| anyhow::anyhow!("spawning treekeepers: {}", e))?;
    GuidePost::spawn(store.clone(), handlers.clone(), config.readonly, &reaper).await;

    let state = soma_api::AppState {
        store,
        handlers,
        supervisor,
        perm,
        custodian,
        workflow,
        readonly: config.readonly,
        request_timeout: Duration::from_secs(30),
    };
    let app = soma_api::build_app(state);

    if config.daemon.tls {
        // termination is expected in front of the daemon
        warn!("daemon.tls is set; terminate TLS at the ingress in front of somad");
    }
    let addr: SocketAddr = format!("{}:{}", config.daemon.listen, config.daemon.port)
        .parse()
        .context("parsing daemon.listen/daemon.port")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(%addr, "somad listening");

    let shutdown_reaper = reaper.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("http server")?;

    // drain-then-stop: every treekeeper acknowledges before exit
    shutdown_reaper.reap().await;
    info!("somad stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
