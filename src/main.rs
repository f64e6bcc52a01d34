//! connect4 binary entrypoint: asks for an identity, opens a coordination session
//! and takes part in one match.

use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, bail};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use connect4_coord::{
    config::{AppConfig, Backend},
    console::{Console, TerminalConsole},
    coord::{SharedCoordinator, memory::MemoryCoordinator},
    error::MatchError,
    services::{lifecycle, namespace::MatchNamespace},
    state::{MatchContext, identity::Identity},
};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = AppConfig::load();
    let console = Arc::new(TerminalConsole::new());
    let identity = read_identity(console.as_ref()).await?;

    let coord = connect(&config).await?;
    let namespace = MatchNamespace::new(coord.clone(), config.namespace.clone());
    info!(
        session = %coord.session_id(),
        identity = %identity,
        namespace = %namespace.root(),
        "coordination session established"
    );

    let ctx = MatchContext::new(identity, namespace, config.settings);
    let played = tokio::select! {
        result = lifecycle::run(ctx, console) => result.map(drop),
        _ = shutdown_signal() => {
            warn!(identity = %identity, "shutdown requested; leaving the match");
            Err(MatchError::Interrupted)
        }
    };

    // The session goes away on every exit path, taking our presence marker with it.
    if let Err(err) = coord.close().await {
        warn!(error = %err, "failed to close coordination session");
    }
    played.context("match aborted")
}

/// Ask for the role this process plays; anything unknown is fatal.
async fn read_identity(console: &dyn Console) -> anyhow::Result<Identity> {
    let Some(line) = console
        .read_line("Who are you? (player1, player2, observer): ")
        .await
        .context("reading identity")?
    else {
        bail!("no identity given");
    };
    Ok(line.parse::<Identity>().map_err(MatchError::from)?)
}

/// Open a session against the configured backend.
async fn connect(config: &AppConfig) -> anyhow::Result<SharedCoordinator> {
    match config.backend {
        Backend::Memory => {
            warn!("memory backend only coordinates participants inside this process");
            Ok(MemoryCoordinator::new().connect_shared().await)
        }
        #[cfg(feature = "etcd-store")]
        Backend::Etcd => {
            use connect4_coord::coord::etcd::{EtcdConfig, EtcdSession};

            let session =
                EtcdSession::connect(EtcdConfig::new(&config.endpoint, config.session_timeout))
                    .await
                    .with_context(|| format!("connecting to etcd at {}", config.endpoint))?;
            Ok(Arc::new(session))
        }
        #[cfg(not(feature = "etcd-store"))]
        Backend::Etcd => bail!("built without the `etcd-store` feature"),
    }
}

/// Configure tracing so logs go to stderr and the console UI keeps stdout.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "warn,connect4_coord=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
