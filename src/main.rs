use anyhow::Context;
use lendnet::external::{
    Collaborators, InMemoryCustody, LinearRateModel, StaticPriceOracle, StaticRiskEngine,
};
use lendnet::orchestration::{EpochClock, WallClockEpochClock};
use lendnet::{api, config::Config, db::init_db, LedgerRegistry, Repository, RoundCoordinator};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = Config::from_env().context("configuration error")?;

    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .context("failed to initialize database")?;
    let repo = Arc::new(Repository::new(pool));

    let clock = Arc::new(WallClockEpochClock::new(config.epoch_length_ms));
    let start_epoch = clock.current_epoch();
    let ledgers = Arc::new(LedgerRegistry::new());
    for pool_id in &config.pools {
        ledgers.register(pool_id.clone(), config.pool_params(), start_epoch);
    }
    tracing::info!(pools = config.pools.len(), epoch = %start_epoch, "pools registered");

    let oracle = StaticPriceOracle::new();
    for (pool_id, price) in &config.prices {
        oracle.set_price(pool_id, *price);
    }
    let custody = InMemoryCustody::new();
    for (pool_id, account, amount) in &config.initial_balances {
        custody.credit(pool_id, account, *amount);
    }
    let collaborators = Collaborators {
        custody: Arc::new(custody),
        risk: Arc::new(StaticRiskEngine::new()),
        rate_model: Arc::new(LinearRateModel::new(config.base_rate, config.rate_slope)),
        oracle: Arc::new(oracle),
    };

    let coordinator = Arc::new(RoundCoordinator::assemble(
        ledgers,
        collaborators,
        config.liquidation_params(),
        clock,
        repo.clone(),
        config.worker_pool_size,
    ));

    // The engine has no timers of its own; this scheduler is the round boundary.
    if let Some(interval_ms) = config.flush_interval_ms {
        let scheduled = coordinator.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                scheduled.flush().await;
            }
        });
        tracing::info!(interval_ms, "flush scheduler started");
    }

    let app = api::create_router(api::AppState::new(repo, config, coordinator));

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
