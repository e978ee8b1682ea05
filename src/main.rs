use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use govai_sentinel::{
    ApiState, BackendTallySource, ConsensusAggregator, HealthProbe, HttpScoringOracle,
    HttpVoteBackend, InMemoryVoteLedger, LedgerRpcClient, LedgerTallySource, LocalKeypairProvider,
    OracleHttpClient, PollRecord, SentinelConfig, SessionStore, SyncEngine, TallySource, TallySourceKind,
    VoteBackend, VoteSubmitter, WalletKeypair, WalletSessionManager, create_router,
    config::sanitize_for_logging,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first - this validates every setting
    let config = Arc::new(SentinelConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        eprintln!("Please check GOVAI_* environment variables.");
        e
    })?);

    init_logging(&config)?;

    info!("Starting GovAI Sentinel");
    info!(
        "Backend: {}, tally source: {:?}, HTTPS required: {}",
        config.backend.url, config.tally_source, config.backend.require_https
    );

    let http = OracleHttpClient::new(config.http_config())?;
    let ledger_rpc = LedgerRpcClient::new(http.clone(), config.ledger.rpc_url.clone());

    let http_votes = || -> Arc<dyn VoteBackend> {
        Arc::new(HttpVoteBackend::new(http.clone(), config.backend.url.clone()))
    };

    // Tally source and vote backend
    let source: Arc<dyn TallySource>;
    let vote_backend: Arc<dyn VoteBackend>;
    match config.tally_source {
        TallySourceKind::Backend => {
            source = Arc::new(BackendTallySource::new(http.clone(), config.backend.url.clone()));
            vote_backend = http_votes();
        }
        TallySourceKind::Ledger => {
            source = Arc::new(ledger_source(&config, ledger_rpc.clone()));
            vote_backend = http_votes();
        }
        TallySourceKind::Memory => {
            warn!("Running in offline mode, votes are kept in memory only");
            let ledger = Arc::new(memory_ledger(&config));
            source = ledger.clone();
            vote_backend = ledger;
        }
    }

    let sync = Arc::new(SyncEngine::new(source, config.sync_config()));
    let consensus = Arc::new(ConsensusAggregator::new(
        Arc::new(HttpScoringOracle::new(http.clone(), config.backend.url.clone())),
        config.scoring_timeout(),
    ));

    // Wallet session with best-effort restore
    let keypair = match &config.wallet.secret_key {
        Some(secret) => WalletKeypair::from_hex(secret).context("Invalid GOVAI_WALLET_SECRET_KEY")?,
        None => WalletKeypair::generate(),
    };
    let local_wallet = LocalKeypairProvider::new("local", keypair);
    info!("Local wallet provider ready for {}", sanitize_for_logging(&local_wallet.address()));

    let wallet = Arc::new(
        WalletSessionManager::new(Arc::new(ledger_rpc))
            .with_provider(Arc::new(local_wallet))
            .with_store(SessionStore::new(&config.wallet.session_file)),
    );
    if let Some(session) = wallet.restore().await {
        info!("Resumed wallet session {}", sanitize_for_logging(&session.address));
    }

    let votes = Arc::new(VoteSubmitter::new(
        wallet.clone(),
        vote_backend,
        sync.clone(),
        consensus.clone(),
        config.vote_timeout(),
    ));

    sync.start(&config.poll_ids)?;
    let recompute = tokio::spawn(recompute_on_tally_change(sync.clone(), consensus.clone()));

    let app = create_router(ApiState {
        sync: sync.clone(),
        consensus,
        wallet,
        votes,
        backend: (config.tally_source != TallySourceKind::Memory)
            .then(|| HealthProbe::new(http, config.backend.url.clone())),
    })
    .layer(TraceLayer::new_for_http());

    let bind_addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("Sentinel API listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sync.stop().await;
    recompute.abort();
    info!("GovAI Sentinel stopped");

    Ok(())
}

/// Initialize logging; `RUST_LOG` overrides the configured level
fn init_logging(config: &SentinelConfig) -> Result<()> {
    let level = match config.logging.level.to_lowercase().as_str() {
        "error" => "error",
        "warn" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}

/// Build the on-chain tally source from the configured poll accounts
fn ledger_source(config: &SentinelConfig, rpc: LedgerRpcClient) -> LedgerTallySource {
    let mut source = LedgerTallySource::new(rpc);
    for poll_id in &config.poll_ids {
        if let Some(account) = config.ledger.accounts.get(poll_id) {
            let poll = PollRecord::new(poll_id.clone(), "", config.ledger.options.iter().cloned());
            source = source.with_poll(poll, account.clone());
        }
    }
    source
}

/// Offline ledger with every configured poll registered
fn memory_ledger(config: &SentinelConfig) -> InMemoryVoteLedger {
    let ledger = InMemoryVoteLedger::new();
    for poll_id in &config.poll_ids {
        ledger.register_poll(PollRecord::new(poll_id.clone(), "", config.ledger.options.iter().cloned()));
    }
    ledger
}

/// Warm the consensus cache whenever a poll's tally version moves
async fn recompute_on_tally_change(sync: Arc<SyncEngine>, consensus: Arc<ConsensusAggregator>) {
    let mut updates = sync.subscribe();
    let mut seen: HashMap<String, u64> = HashMap::new();

    loop {
        let snapshot = match updates.recv().await {
            Ok(snapshot) => snapshot,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Tally update stream lagged, skipped {} updates", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if snapshot.version == 0 || seen.get(&snapshot.poll_id) == Some(&snapshot.version) {
            continue;
        }
        seen.insert(snapshot.poll_id.clone(), snapshot.version);

        let view = consensus.consensus(&snapshot.poll_id, snapshot.version).await;
        debug!(
            poll_id = %snapshot.poll_id,
            total = snapshot.total,
            score = view.result.score,
            label = %view.display_label(),
            "Tally changed"
        );
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
