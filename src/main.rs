use std::sync::Arc;

use alloy::signers::local::PrivateKeySigner;
use eyre::{eyre, WrapErr};

use inscription_indexer::api::{self, AppState};
use inscription_indexer::bridge::{MintService, NonceManager, ProvenanceClient, Verifier};
use inscription_indexer::chain::{ChainClient, EvmClient};
use inscription_indexer::config::Config;
use inscription_indexer::events::ContractSet;
use inscription_indexer::metrics;
use inscription_indexer::processing::{run_follower, ProcessingService};
use inscription_indexer::queue::{BlockProcessor, BlockQueue};
use inscription_indexer::retry::RetryConfig;
use inscription_indexer::store::{PostgresStore, Store};
use inscription_indexer::types::Chain;

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    // Cooperative scheduling on one thread; every shared structure is
    // serialized through async mutexes anyway.
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("Starting inscription indexer");

    let config = Config::load()?;
    tracing::info!(
        l1_chain_id = config.l1.chain_id,
        l2_chain_id = config.l2.chain_id,
        "Configuration loaded"
    );

    let store: Arc<dyn Store> = Arc::new(
        PostgresStore::connect(&config.database.url)
            .await
            .map_err(|e| eyre!("{e}"))?,
    );
    tracing::info!("Database connected, migrations applied");

    let contracts = ContractSet::from_config(&config.contracts).map_err(|e| eyre!("{e}"))?;

    let signer: PrivateKeySigner = config
        .bridge
        .minter_private_key
        .parse()
        .wrap_err("MINTER_PRIVATE_KEY is not a valid private key")?;
    let minter_address = signer.address();

    let l1: Arc<dyn ChainClient> = Arc::new(
        EvmClient::new(
            &config.l1,
            Chain::L1,
            contracts.addresses(Chain::L1),
            contracts.bridge_l1,
            None,
        )
        .map_err(|e| eyre!("{e}"))?,
    );
    let l2: Arc<dyn ChainClient> = Arc::new(
        EvmClient::new(
            &config.l2,
            Chain::L2,
            contracts.addresses(Chain::L2),
            contracts.bridge_l2,
            Some(signer),
        )
        .map_err(|e| eyre!("{e}"))?,
    );

    let retry = RetryConfig {
        max_retries: config.indexer.max_block_retries,
        ..RetryConfig::default()
    };

    let nonces = Arc::new(NonceManager::new(Arc::clone(&l2), minter_address));
    let provenance = ProvenanceClient::from_url(config.bridge.provenance_url.as_deref())
        .map_err(|e| eyre!("{e}"))?;
    let mints = Arc::new(MintService::new(
        Arc::clone(&store),
        Arc::clone(&l1),
        Arc::clone(&l2),
        Verifier::new(provenance),
        Arc::clone(&nonces),
        retry.clone(),
    ));

    let processor: Arc<ProcessingService> = Arc::new(ProcessingService::new(
        Arc::clone(&store),
        Arc::clone(&l1),
        Arc::clone(&l2),
        contracts,
        mints,
    ));

    let l1_queue = Arc::new(BlockQueue::new(Chain::L1, retry.clone()));
    let l2_queue = Arc::new(BlockQueue::new(Chain::L2, retry));

    let poll_interval = std::time::Duration::from_millis(config.indexer.poll_interval_ms);

    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(
        Arc::clone(&l1_queue).run(Arc::clone(&processor) as Arc<dyn BlockProcessor>),
    );
    tasks.spawn(
        Arc::clone(&l2_queue).run(Arc::clone(&processor) as Arc<dyn BlockProcessor>),
    );
    tasks.spawn(run_follower(
        Arc::clone(&l1_queue),
        Arc::clone(&l1),
        Arc::clone(&store),
        poll_interval,
    ));
    tasks.spawn(run_follower(
        Arc::clone(&l2_queue),
        Arc::clone(&l2),
        Arc::clone(&store),
        poll_interval,
    ));

    let api_addr: std::net::SocketAddr = format!("{}:{}", config.api.bind_address, config.api.port)
        .parse()
        .wrap_err("invalid API bind address")?;
    let api_state = AppState {
        l1_queue,
        l2_queue,
        processor: Arc::clone(&processor) as Arc<dyn BlockProcessor>,
    };
    tasks.spawn(async move {
        if let Err(e) = api::serve(api_addr, api_state).await {
            tracing::error!(error = %e, "Admin server error");
        }
    });

    metrics::UP.set(1.0);
    tracing::info!("Pipeline started");

    tokio::select! {
        _ = wait_for_shutdown_signal() => {}
        _ = tasks.join_next() => {
            tracing::error!("A pipeline task exited unexpectedly");
        }
    }

    metrics::UP.set(0.0);
    tasks.shutdown().await;
    tracing::info!("Inscription indexer stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,inscription_indexer=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
