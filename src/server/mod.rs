//! Webhook HTTP server.
//!
//! Gate order on the webhook path is fixed: dedupe runs before any other
//! side effect, then confirmation debounce, confidence, kill switch, entry
//! window, market resolution, market quality, and finally the risk caps.
//! Only after every gate passes is a paper trade opened and its token
//! subscribed for book updates.

pub mod confirm;
pub mod dedupe;

pub use confirm::{ConfirmOutcome, ConfirmationStore};
pub use dedupe::DedupeStore;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::{derive_window, GammaClient, SlotWindow};
use crate::config::{Config, TradingConfig};
use crate::error::Result;
use crate::market_data::{BookTop, MarketData};
use crate::paper::PositionManager;
use crate::resilience::BreakerRegistry;
use crate::risk::RiskManager;
use crate::telemetry::{MetricsCollector, TradeMetric};
use crate::types::{
    ConfirmationPayload, Direction, PaperTrade, TradeStatus, WebhookDecision, WebhookSignal,
};

pub struct AppState {
    pub config: Config,
    pub positions: Arc<PositionManager>,
    pub market_data: Arc<MarketData>,
    pub risk: Arc<RiskManager>,
    pub gamma: GammaClient,
    pub metrics: Arc<MetricsCollector>,
    pub dedupe: DedupeStore,
    pub confirmations: ConfirmationStore,
    pub breakers: Arc<BreakerRegistry>,
    pub started_at: DateTime<Utc>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/confirm", post(confirm_entry))
        .route("/health", get(health))
        .route("/metrics", get(metrics_prometheus))
        .route("/metrics/risk", get(metrics_risk))
        .route("/state", get(state_snapshot))
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr, mode = %state.config.trading.mode_str(), "webhook server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn webhook(
    State(state): State<Arc<AppState>>,
    Json(signal): Json<WebhookSignal>,
) -> Json<WebhookDecision> {
    let started = Instant::now();
    let now = Utc::now();

    let Some(direction) = signal.direction() else {
        state.metrics.increment("signals_invalid_total");
        return Json(WebhookDecision::skipped(
            "invalid_signal",
            "no recognizable direction in payload",
        ));
    };

    let signal_id = effective_signal_id(&signal);

    // Idempotency first: a replayed alert must not reach any gate twice.
    if !state
        .dedupe
        .check_and_insert(&signal_id, direction.as_str())
    {
        state.metrics.increment("signals_duplicate_total");
        return Json(WebhookDecision::skipped(
            "duplicate_signal",
            "already processed within dedupe window",
        ));
    }

    if state.config.confirmation.enabled {
        state.confirmations.arm(&signal_id, signal, direction, now);
        info!(signal_id = %signal_id, direction = %direction, "entry armed, awaiting confirmation");
        return Json(WebhookDecision::pending(format!(
            "confirm after {}s",
            state.config.confirmation.delay_secs
        )));
    }

    let decision = execute_entry(&state, signal, direction, &signal_id, now).await;
    state
        .metrics
        .observe_latency("webhook_handler", started.elapsed().as_millis() as u64);
    Json(decision)
}

async fn confirm_entry(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConfirmationPayload>,
) -> Json<WebhookDecision> {
    let now = Utc::now();
    let direction = payload.signal.as_deref().and_then(Direction::parse);
    match state.confirmations.resolve(&payload.signal_id, direction, now) {
        ConfirmOutcome::Ready(pending) => {
            let signal_id = effective_signal_id(&pending.signal);
            let decision =
                execute_entry(&state, pending.signal, pending.direction, &signal_id, now).await;
            Json(decision)
        }
        ConfirmOutcome::TooEarly { remaining_secs } => Json(WebhookDecision::pending(format!(
            "too early, {remaining_secs}s remaining"
        ))),
        ConfirmOutcome::Expired => Json(WebhookDecision::skipped(
            "confirmation_expired",
            "pending entry outlived its TTL",
        )),
        ConfirmOutcome::Unknown => Json(WebhookDecision::skipped(
            "unknown_signal",
            "no pending entry for this signal id",
        )),
    }
}

/// Remaining gates and the actual entry. Shared by the direct webhook path
/// and the confirmation path.
async fn execute_entry(
    state: &AppState,
    signal: WebhookSignal,
    direction: Direction,
    signal_id: &str,
    now: DateTime<Utc>,
) -> WebhookDecision {
    let started = Instant::now();
    let confidence = signal
        .confidence
        .unwrap_or(state.config.risk.min_confidence);

    if let Err(reason) = state.risk.check_confidence(confidence) {
        return block(state, direction, &reason, started, "confidence outside window");
    }
    if let Err(reason) = state.risk.check_kill_switch(now) {
        return block(state, direction, &reason, started, "kill switch cooldown active");
    }

    let window = derive_window(
        state.config.entry_window.timeframe_minutes,
        signal.window_end_ms,
        Some(signal_id),
        now,
    );
    if let Err(reason) = check_entry_window(&window, now, &state.config) {
        return block(state, direction, &reason, started, "outside entry window");
    }

    let market = match state.gamma.resolve_market(&window.slug).await {
        Ok(m) => m,
        Err(e) => {
            warn!(slug = %window.slug, error = %e, "market resolution failed");
            return block(state, direction, "market_not_found", started, "gamma lookup failed");
        }
    };
    if market.closed || !market.active {
        return block(state, direction, "market_closed", started, "market not tradable");
    }

    let token_id = market.token_for(direction).to_string();
    state.market_data.subscribe(&token_id);
    let top = entry_book(state, &token_id).await;
    if let Err(reason) = state.risk.check_market_quality(top.as_ref()) {
        return block(state, direction, &reason, started, "market quality gate");
    }

    let size = entry_size(&state.config.trading, &state.risk, &signal);
    if let Err(reason) = state.risk.check_exposure(state.positions.open_exposure(), size) {
        return block(state, direction, &reason, started, "exposure cap");
    }
    if let Err(reason) = state
        .risk
        .check_direction_limit(&state.positions.open_trades(), direction)
    {
        return block(state, direction, &reason, started, "one open trade per direction");
    }

    let entry_price = top.as_ref().and_then(|t| t.best_ask).or_else(|| {
        let idx = match direction {
            Direction::Up => 0,
            Direction::Down => 1,
        };
        market.best_prices.get(idx).copied()
    });

    let trade = PaperTrade {
        trade_id: Uuid::new_v4().to_string(),
        market_slug: market.slug.clone(),
        token_id,
        direction,
        size,
        entry_price,
        opened_at: now,
        window_end: Some(window.end),
        status: TradeStatus::Confirmed,
        confidence: Some(confidence),
        session_id: state.config.trading.session_id.clone(),
        signal_id: Some(signal_id.to_string()),
        bars_elapsed: 0,
        exit_price: None,
        exit_reason: None,
        closed_at: None,
        realized_pnl: None,
    };
    let trade_id = trade.trade_id.clone();
    let trade_size = trade.size;
    if let Err(e) = state.positions.open(trade) {
        warn!(error = %e, "open rejected");
        return block(state, direction, "market_locked", started, "entry already open");
    }

    state.metrics.record_trade(TradeMetric {
        timestamp: now,
        market_slug: market.slug,
        direction: direction.as_str().into(),
        size: trade_size,
        status: "accepted".into(),
        block_reason: None,
        latency_ms: started.elapsed().as_millis() as u64,
    });
    WebhookDecision::accepted(trade_id)
}

/// Top of book for an entry. A newly subscribed token has no WS snapshot
/// yet, so fall back to a REST fetch and seed the cache with the result.
async fn entry_book(state: &AppState, token_id: &str) -> Option<BookTop> {
    if let Some(top) = state.market_data.top_of_book(token_id) {
        return Some(top);
    }
    match state.gamma.fetch_book(token_id).await {
        Ok(Some(top)) => {
            state.market_data.cache().update(token_id, top.clone());
            Some(top)
        }
        Ok(None) => None,
        Err(e) => {
            warn!(token = token_id, error = %e, "rest book fetch failed");
            None
        }
    }
}

/// Stake for a new entry: an explicit payload size wins, confidence-scaled
/// sizing applies when the signal carries a confidence, otherwise the flat
/// paper stake.
fn entry_size(trading: &TradingConfig, risk: &RiskManager, signal: &WebhookSignal) -> Decimal {
    if let Some(size) = signal.size {
        return size;
    }
    match signal.confidence {
        Some(c) => risk.position_size(c),
        None => trading.paper_size,
    }
}

/// Late entries and windows about to close are both rejected.
fn check_entry_window(
    window: &SlotWindow,
    now: DateTime<Utc>,
    config: &Config,
) -> std::result::Result<(), String> {
    let since_start = window.seconds_since_start(now);
    if since_start < 0 || since_start > config.entry_window.entry_deadline_secs as i64 {
        return Err("entry_too_late".into());
    }
    if window.seconds_to_end(now) < config.entry_window.min_time_to_end_secs as i64 {
        return Err("window_closing".into());
    }
    Ok(())
}

fn block(
    state: &AppState,
    direction: Direction,
    reason: &str,
    started: Instant,
    message: &str,
) -> WebhookDecision {
    state.metrics.record_trade(TradeMetric {
        timestamp: Utc::now(),
        market_slug: String::new(),
        direction: direction.as_str().into(),
        size: Decimal::ZERO,
        status: "blocked".into(),
        block_reason: Some(reason.to_string()),
        latency_ms: started.elapsed().as_millis() as u64,
    });
    WebhookDecision::skipped(reason, message)
}

fn effective_signal_id(signal: &WebhookSignal) -> String {
    signal.signal_id.clone().unwrap_or_else(|| {
        format!(
            "bar-{}",
            signal.bar_time.or(signal.window_end_ms).unwrap_or_default()
        )
    })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let now = Utc::now();
    let orphans = state.positions.orphan_count(now);
    let stats = state.positions.stats();
    let status = if orphans > 0 { "degraded" } else { "ok" };
    Json(serde_json::json!({
        "status": status,
        "mode": state.config.trading.mode_str(),
        "version": state.config.server.version,
        "uptime_secs": (now - state.started_at).num_seconds(),
        "open_trades": stats.open_count,
        "orphans": orphans,
        "auto_close": state.config.auto_close.enabled,
        "kill_switch": state.risk.kill_switch.active_trip(now),
    }))
}

async fn metrics_prometheus(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export_prometheus(),
    )
}

async fn metrics_risk(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let now = Utc::now();
    Json(serde_json::json!({
        "kill_switch": state.risk.kill_switch.active_trip(now),
        "breakers": state.breakers.snapshots(),
        "gamma_retry": state.gamma.retry_stats(),
        "block_reasons": state.metrics.block_reasons(),
        "open_exposure": state.positions.open_exposure(),
        "equity": state.risk.equity(),
    }))
}

async fn state_snapshot(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let now = Utc::now();
    Json(serde_json::json!({
        "mode": state.config.trading.mode_str(),
        "stats": state.positions.stats(),
        "open_trades": state.positions.open_trades(),
        "subscriptions": state.market_data.subscription_count(),
        "pending_confirmations": state.confirmations.pending_count(),
        "go_no_go": state.positions.go_no_go(now),
        "summary": state.metrics.summary(),
    }))
}
