//! Webhook-driven paper trading server for BTC up/down markets.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use updown_bot::{
    client::GammaClient,
    config::Config,
    paper::{AutoCloser, Ledger, PositionManager},
    pipeline::PipelineStore,
    resilience::{BreakerRegistry, RetryPolicy},
    risk::RiskManager,
    server::{AppState, ConfirmationStore, DedupeStore},
    supervisor::Supervisor,
    telemetry::MetricsCollector,
};

#[derive(Parser)]
#[command(name = "updown-bot")]
#[command(about = "Webhook-driven paper trading server for BTC up/down markets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server
    Serve,
    /// Spawn and supervise a server process (port wait + health probe)
    Launch,
    /// Query a running instance's health endpoint
    Status {
        /// Override the health URL
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Launch => launch(config, &cli.config).await,
        Commands::Status { url } => status(config, url).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let (live_ok, live_reason) = config.trading.live_allowed();
    if live_ok {
        anyhow::bail!("live execution is not wired up; set trading.mode = \"paper\"");
    }
    tracing::info!(mode = %config.trading.mode_str(), reason = live_reason, "starting in paper mode");

    // Paper engine, rehydrated from the JSONL ledger.
    let ledger = Ledger::new(&config.ledger.paper_log_path);
    let positions = Arc::new(PositionManager::new(ledger));
    if config.ledger.rehydrate_on_startup {
        let restored = positions.rehydrate(config.ledger.rehydrate_max_age_hours)?;
        tracing::info!(restored, "rehydrated open trades from ledger");
    }

    // Market data feed + stale-subscription reconciler.
    let market_data = Arc::new(updown_bot::market_data::MarketData::new(
        config.market_data.clone(),
    ));
    if market_data.spawn_feed().is_some() {
        tracing::info!(ws_url = %config.market_data.ws_url, "market data feed started");
    } else {
        tracing::warn!("websocket feed disabled, entries will rely on REST prices");
    }
    tokio::spawn(market_data.clone().run_reconcile_loop());

    let risk = Arc::new(RiskManager::new(
        config.risk.clone(),
        config.trading.initial_equity,
    ));
    if let Some(trip) = risk.kill_switch.active_trip(Utc::now()) {
        tracing::warn!(reason = %trip.reason, until = %trip.cooldown_until, "kill switch active from previous session");
    }

    // Gamma client resilience comes from the [resilience] config section.
    let breakers = Arc::new(BreakerRegistry::new());
    let gamma = GammaClient::new(
        &config.gamma.base_url,
        &config.gamma.clob_base_url,
        RetryPolicy::new("gamma", &config.resilience.retry),
        breakers.get_with("gamma", (&config.resilience.breaker).into()),
    )?;

    // Content-pipeline store: connecting runs the migrations.
    let pipeline = PipelineStore::connect(&config.database.path).await?;
    let idea_count = pipeline.list_ideas(None).await?.len();
    tracing::info!(path = %config.database.path, idea_count, "pipeline store ready");

    let metrics = Arc::new(MetricsCollector::new(1000));

    let state = Arc::new(AppState {
        positions: positions.clone(),
        market_data: market_data.clone(),
        risk: risk.clone(),
        gamma,
        metrics,
        dedupe: DedupeStore::new(config.confirmation.dedupe_ttl_secs),
        confirmations: ConfirmationStore::new(
            config.confirmation.delay_secs,
            config.confirmation.ttl_secs,
        ),
        breakers,
        started_at: Utc::now(),
        config: config.clone(),
    });

    // Pending confirmations that never get their second alert expire here.
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            interval.tick().await;
            loop {
                interval.tick().await;
                let dropped = state.confirmations.sweep(Utc::now());
                if dropped > 0 {
                    tracing::info!(dropped, "expired pending confirmations");
                }
            }
        });
    }

    // Exit engine.
    let auto_closer = Arc::new(AutoCloser::new(
        config.auto_close.clone(),
        config.entry_window.clone(),
        positions.clone(),
        market_data,
        risk,
    ));
    tokio::spawn(auto_closer.run());

    // Bar clock for the time stop.
    {
        let positions = positions.clone();
        let bar = Duration::from_secs(u64::from(config.entry_window.timeframe_minutes) * 60);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(bar);
            interval.tick().await;
            loop {
                interval.tick().await;
                positions.on_bar();
            }
        });
    }

    let verdict = positions.go_no_go(Utc::now());
    if verdict.go {
        tracing::info!("session go/no-go: GO");
    } else {
        tracing::warn!(reasons = ?verdict.reasons, "session go/no-go: NO-GO");
    }

    updown_bot::server::serve(state).await?;
    Ok(())
}

async fn launch(config: Config, config_path: &str) -> anyhow::Result<()> {
    let exe = std::env::current_exe()?;
    let server_cmd = vec![
        exe.display().to_string(),
        "--config".to_string(),
        config_path.to_string(),
        "serve".to_string(),
    ];

    let supervisor = Supervisor::new(config.supervisor.clone(), config.server.clone());
    let mut launched = supervisor.launch(&server_cmd).await?;

    println!(
        "✅ Server up on {}:{}",
        config.server.host, config.server.port
    );
    if launched.tunnel.is_some() {
        println!("🔗 Reverse tunnel running");
    }

    let exit = launched.server.wait().await?;
    if let Some(mut tunnel) = launched.tunnel.take() {
        let _ = tunnel.kill().await;
    }
    if !exit.success() {
        anyhow::bail!("server exited with {}", exit);
    }
    Ok(())
}

async fn status(config: Config, url: Option<String>) -> anyhow::Result<()> {
    let url = url.unwrap_or_else(|| {
        format!(
            "http://{}:{}/health",
            config.server.host, config.server.port
        )
    });

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.supervisor.health_timeout_secs))
        .build()?;
    let body: serde_json::Value = client.get(&url).send().await?.json().await?;

    println!("\n💓 Server Status ({})\n", url);
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
