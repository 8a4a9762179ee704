// annotatord: native host entry point. Speaks the bus protocol over stdio.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use annotator_common::types::Session;
use annotator_daemon::bus::PortKind;
use annotator_daemon::config::AnnotatorConfig;
use annotator_daemon::panel::remote::{HttpPersistence, MemoryService};
use annotator_daemon::panel::PersistenceService;
use annotator_daemon::runtime::{self, RuntimeOptions};
use annotator_daemon::store::{MemoryStore, OnboardingFlags, SharedStore, SqliteStore};
use annotator_daemon::transport;
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "annotatord", about = "Expert annotator host: coordinator and control panel")]
struct Args {
    /// Config file (defaults to ~/.annotator/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Shared store database.
    #[arg(long)]
    store: Option<PathBuf>,
    /// Resume this session id.
    #[arg(long)]
    session: Option<String>,
    /// Keep everything in memory instead of calling the persistence service.
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AnnotatorConfig::load_from(path)
            .with_context(|| format!("failed to load config `{}`", path.display()))?,
        None => AnnotatorConfig::load(),
    };
    let store = open_store(args.store.clone().or_else(|| config.resolved_store_path()))?;
    greet(store.as_ref());

    if args.offline {
        let service = Arc::new(MemoryService::new());
        let session = runtime::resolve_session(
            service.as_ref(),
            store.as_ref(),
            args.session.as_deref(),
            &config.session,
            config.retry_policy(),
        )
        .await?;
        service.insert_session(session.clone());
        info!(session = %session.session_id, "starting annotator host in offline mode");
        host(service, store, &config, session).await
    } else {
        let service = Arc::new(
            HttpPersistence::new(&config.service_url, config.request_timeout())
                .context("failed to configure persistence service")?,
        );
        let session = runtime::resolve_session(
            service.as_ref(),
            store.as_ref(),
            args.session.as_deref(),
            &config.session,
            config.retry_policy(),
        )
        .await?;
        info!(
            session = %session.session_id,
            service = %config.service_url,
            "starting annotator host"
        );
        host(service, store, &config, session).await
    }
}

fn open_store(path: Option<PathBuf>) -> anyhow::Result<Arc<dyn SharedStore>> {
    match path {
        Some(path) => {
            let store = SqliteStore::open(&path)
                .with_context(|| format!("failed to open shared store `{}`", path.display()))?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("no home directory, keeping shared state in memory");
            Ok(Arc::new(MemoryStore::default()))
        }
    }
}

fn greet(store: &dyn SharedStore) {
    let mut flags = match OnboardingFlags::load(store) {
        Ok(flags) => flags,
        Err(error) => {
            warn!(?error, "failed to read onboarding flags");
            return;
        }
    };
    if flags.welcome_seen {
        return;
    }
    info!("first run: select text or draw on a PDF page to create a highlight");
    flags.welcome_seen = true;
    if let Err(error) = flags.save(store) {
        warn!(?error, "failed to record onboarding flags");
    }
}

async fn host<S: PersistenceService>(
    service: Arc<S>,
    store: Arc<dyn SharedStore>,
    config: &AnnotatorConfig,
    session: Session,
) -> anyhow::Result<()> {
    let options = RuntimeOptions::from_config(config, session.session_id);
    let handle = runtime::start(service, store, options).context("failed to start runtime")?;
    let (uplink, downlink) =
        handle.connect(PortKind::Host).await.context("failed to connect host port")?;
    let shutdown = handle.subscribe_shutdown();

    tokio::select! {
        result = transport::serve_stdio(uplink, downlink, shutdown) => {
            result.context("host transport failed")?;
        }
        _ = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
    }
    handle.wait().await;
    Ok(())
}
