//! Layered configuration: TOML file with environment overrides.
//!
//! Every knob has a default matching the documented production values, so an
//! empty config file yields a runnable paper-mode server. Environment
//! variables use the `UPDOWN` prefix with `__` as section separator, e.g.
//! `UPDOWN__RISK__MAX_EXPOSURE_PCT=0.10`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{BotError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub entry_window: EntryWindowConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub auto_close: AutoCloseConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub gamma: GammaConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl Config {
    /// Load from a TOML file (optional) overlaid with `UPDOWN__*` env vars.
    pub fn load(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path).to_string();
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(&expanded).required(false))
            .add_source(config::Environment::with_prefix("UPDOWN").separator("__"))
            .build()
            .map_err(|e| BotError::Config(e.to_string()))?;
        let cfg: Config = cfg
            .try_deserialize()
            .map_err(|e| BotError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let r = &self.risk;
        if r.base_risk_pct <= Decimal::ZERO || r.base_risk_pct > Decimal::ONE {
            return Err(BotError::Config("risk.base_risk_pct must be in (0, 1]".into()));
        }
        if r.max_exposure_pct <= Decimal::ZERO || r.max_exposure_pct > Decimal::ONE {
            return Err(BotError::Config("risk.max_exposure_pct must be in (0, 1]".into()));
        }
        if r.min_confidence > r.max_confidence {
            return Err(BotError::Config(
                "risk.min_confidence must not exceed risk.max_confidence".into(),
            ));
        }
        if self.entry_window.timeframe_minutes == 0 {
            return Err(BotError::Config("entry_window.timeframe_minutes must be >= 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_version")]
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            version: default_version(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// "paper" or "live". Live mode additionally requires `allow_live`.
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default)]
    pub allow_live: bool,
    /// Global kill switch; blocks live trading regardless of other flags.
    #[serde(default)]
    pub live_kill_switch: bool,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Base stake per paper trade in USDC.
    #[serde(default = "default_paper_size")]
    pub paper_size: Decimal,
    #[serde(default = "default_initial_equity")]
    pub initial_equity: Decimal,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            dry_run: true,
            allow_live: false,
            live_kill_switch: false,
            session_id: None,
            paper_size: default_paper_size(),
            initial_equity: default_initial_equity(),
        }
    }
}

impl TradingConfig {
    pub fn is_paper(&self) -> bool {
        self.mode.to_lowercase() != "live" || self.dry_run
    }

    /// Live trading is gated behind three independent flags.
    pub fn live_allowed(&self) -> (bool, &'static str) {
        if self.live_kill_switch {
            return (false, "kill_switch_enabled");
        }
        if !self.allow_live {
            return (false, "allow_live_disabled");
        }
        if self.mode.to_lowercase() != "live" || self.dry_run {
            return (false, "paper_mode");
        }
        (true, "ok")
    }

    pub fn mode_str(&self) -> String {
        if self.dry_run {
            "DRY_RUN".to_string()
        } else {
            self.mode.to_uppercase()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of equity risked per trade.
    #[serde(default = "default_base_risk_pct")]
    pub base_risk_pct: Decimal,
    /// Cap on total open exposure as a fraction of equity.
    #[serde(default = "default_max_exposure_pct")]
    pub max_exposure_pct: Decimal,
    /// Absolute adverse price move that triggers the soft stop.
    #[serde(default = "default_soft_stop")]
    pub soft_stop_adverse_move: Decimal,
    #[serde(default = "default_time_stop_bars")]
    pub time_stop_bars: u32,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: u8,
    #[serde(default = "default_max_confidence")]
    pub max_confidence: u8,
    /// Entry is rejected above this spread.
    #[serde(default = "default_max_entry_spread")]
    pub max_entry_spread: Decimal,
    /// Spread at which the market is considered broken, regardless of mode.
    #[serde(default = "default_hard_reject_spread")]
    pub hard_reject_spread: Decimal,
    #[serde(default = "default_true")]
    pub entry_require_fresh_book: bool,
    #[serde(default = "default_book_age")]
    pub entry_max_book_age_secs: u64,
    #[serde(default = "default_min_ask_size")]
    pub min_ask_size: Decimal,
    #[serde(default)]
    pub kill_switch: KillSwitchConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_risk_pct: default_base_risk_pct(),
            max_exposure_pct: default_max_exposure_pct(),
            soft_stop_adverse_move: default_soft_stop(),
            time_stop_bars: default_time_stop_bars(),
            min_confidence: default_min_confidence(),
            max_confidence: default_max_confidence(),
            max_entry_spread: default_max_entry_spread(),
            hard_reject_spread: default_hard_reject_spread(),
            entry_require_fresh_book: true,
            entry_max_book_age_secs: default_book_age(),
            min_ask_size: default_min_ask_size(),
            kill_switch: KillSwitchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How many most-recent closed trades feed the trip evaluation.
    #[serde(default = "default_ks_lookback")]
    pub lookback_closed: usize,
    /// Trip when the lookback's summed realized PnL drops to this or below.
    #[serde(default = "default_ks_max_loss")]
    pub max_realized_loss: Decimal,
    /// Trip when the lookback win rate falls below this (full window only).
    #[serde(default = "default_ks_min_winrate")]
    pub min_winrate: f64,
    #[serde(default = "default_ks_cooldown")]
    pub cooldown_secs: u64,
    /// Cooldown survives restarts via this JSON file.
    #[serde(default = "default_ks_state_path")]
    pub state_path: String,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookback_closed: default_ks_lookback(),
            max_realized_loss: default_ks_max_loss(),
            min_winrate: default_ks_min_winrate(),
            cooldown_secs: default_ks_cooldown(),
            state_path: default_ks_state_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryWindowConfig {
    #[serde(default = "default_timeframe")]
    pub timeframe_minutes: u32,
    /// Latest entry, seconds after window start.
    #[serde(default = "default_entry_deadline")]
    pub entry_deadline_secs: u64,
    /// Minimum remaining time in the window at entry.
    #[serde(default = "default_min_time_to_end")]
    pub min_time_to_end_secs: u64,
    /// Close this many seconds before the window ends.
    #[serde(default = "default_close_buffer")]
    pub auto_close_buffer_secs: u64,
}

impl Default for EntryWindowConfig {
    fn default() -> Self {
        Self {
            timeframe_minutes: default_timeframe(),
            entry_deadline_secs: default_entry_deadline(),
            min_time_to_end_secs: default_min_time_to_end(),
            auto_close_buffer_secs: default_close_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    /// Two-step debounce: first alert arms, second alert (after `delay_secs`,
    /// within `ttl_secs`) confirms.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_confirm_delay")]
    pub delay_secs: u64,
    #[serde(default = "default_confirm_ttl")]
    pub ttl_secs: u64,
    /// Duplicate signal-id suppression window.
    #[serde(default = "default_dedupe_ttl")]
    pub dedupe_ttl_secs: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_secs: default_confirm_delay(),
            ttl_secs: default_confirm_ttl(),
            dedupe_ttl_secs: default_dedupe_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoCloseConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_auto_close_ttl")]
    pub ttl_minutes: f64,
    #[serde(default = "default_true")]
    pub on_market_end: bool,
    #[serde(default = "default_poll_interval")]
    pub price_poll_interval_secs: u64,
}

impl Default for AutoCloseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_minutes: default_auto_close_ttl(),
            on_market_end: true,
            price_poll_interval_secs: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub breaker: BreakerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_retry_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_retry_base_ms(),
            max_delay_ms: default_retry_max_ms(),
            jitter_ms: default_retry_jitter_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,
    #[serde(default = "default_half_open_max")]
    pub half_open_max_calls: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
            half_open_max_calls: default_half_open_max(),
            success_threshold: default_success_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    #[serde(default = "default_true")]
    pub ws_enabled: bool,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max: u32,
    #[serde(default = "default_cache_stale")]
    pub cache_stale_secs: f64,
    #[serde(default = "default_reconcile_secs")]
    pub reconcile_secs: u64,
    /// Unsubscribe a token after it is missing from open trades for this
    /// many consecutive reconcile cycles.
    #[serde(default = "default_missing_threshold")]
    pub reconcile_missing_threshold: u32,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            ws_enabled: true,
            ws_url: default_ws_url(),
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
            reconnect_max: default_reconnect_max(),
            cache_stale_secs: default_cache_stale(),
            reconcile_secs: default_reconcile_secs(),
            reconcile_missing_threshold: default_missing_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GammaConfig {
    #[serde(default = "default_gamma_url")]
    pub base_url: String,
    /// CLOB REST base, used for on-demand order book fetches.
    #[serde(default = "default_clob_url")]
    pub clob_base_url: String,
}

impl Default for GammaConfig {
    fn default() -> Self {
        Self {
            base_url: default_gamma_url(),
            clob_base_url: default_clob_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub paper_log_path: String,
    #[serde(default = "default_true")]
    pub rehydrate_on_startup: bool,
    #[serde(default = "default_rehydrate_age")]
    pub rehydrate_max_age_hours: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            paper_log_path: default_ledger_path(),
            rehydrate_on_startup: true,
            rehydrate_max_age_hours: default_rehydrate_age(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file backing the content pipeline store.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_port_attempts")]
    pub port_wait_attempts: u32,
    #[serde(default = "default_port_interval")]
    pub port_wait_interval_ms: u64,
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,
    /// Optional reverse-tunnel command line, e.g. `ssh -N -R 80:localhost:5000 host`.
    #[serde(default)]
    pub tunnel_command: Option<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            port_wait_attempts: default_port_attempts(),
            port_wait_interval_ms: default_port_interval(),
            health_timeout_secs: default_health_timeout(),
            tunnel_command: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    5000
}
fn default_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}
fn default_mode() -> String {
    "paper".into()
}
fn default_true() -> bool {
    true
}
fn default_paper_size() -> Decimal {
    Decimal::ONE
}
fn default_initial_equity() -> Decimal {
    Decimal::ONE_HUNDRED
}
fn default_base_risk_pct() -> Decimal {
    Decimal::new(2, 2) // 0.02
}
fn default_max_exposure_pct() -> Decimal {
    Decimal::new(25, 2) // 0.25
}
fn default_soft_stop() -> Decimal {
    Decimal::new(10, 2) // 0.10
}
fn default_time_stop_bars() -> u32 {
    2
}
fn default_min_confidence() -> u8 {
    5
}
fn default_max_confidence() -> u8 {
    10
}
fn default_max_entry_spread() -> Decimal {
    Decimal::new(5, 2) // 0.05
}
fn default_hard_reject_spread() -> Decimal {
    Decimal::new(30, 2) // 0.30
}
fn default_book_age() -> u64 {
    20
}
fn default_min_ask_size() -> Decimal {
    Decimal::new(5, 0)
}
fn default_ks_lookback() -> usize {
    20
}
fn default_ks_max_loss() -> Decimal {
    Decimal::new(-5, 0)
}
fn default_ks_min_winrate() -> f64 {
    0.25
}
fn default_ks_cooldown() -> u64 {
    900
}
fn default_ks_state_path() -> String {
    "data/risk_state.json".into()
}
fn default_timeframe() -> u32 {
    15
}
fn default_entry_deadline() -> u64 {
    60
}
fn default_min_time_to_end() -> u64 {
    30
}
fn default_close_buffer() -> u64 {
    15
}
fn default_confirm_delay() -> u64 {
    60
}
fn default_confirm_ttl() -> u64 {
    180
}
fn default_dedupe_ttl() -> u64 {
    300
}
fn default_auto_close_ttl() -> f64 {
    13.0
}
fn default_poll_interval() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_retry_max_ms() -> u64 {
    60_000
}
fn default_retry_jitter_ms() -> u64 {
    1000
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout() -> u64 {
    60
}
fn default_half_open_max() -> u32 {
    3
}
fn default_success_threshold() -> u32 {
    2
}
fn default_ws_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com".into()
}
fn default_ping_interval() -> u64 {
    10
}
fn default_pong_timeout() -> u64 {
    30
}
fn default_reconnect_max() -> u32 {
    30
}
fn default_cache_stale() -> f64 {
    30.0
}
fn default_reconcile_secs() -> u64 {
    30
}
fn default_missing_threshold() -> u32 {
    3
}
fn default_gamma_url() -> String {
    "https://gamma-api.polymarket.com".into()
}
fn default_clob_url() -> String {
    "https://clob.polymarket.com".into()
}
fn default_ledger_path() -> String {
    "paper_trades.jsonl".into()
}
fn default_rehydrate_age() -> f64 {
    24.0
}
fn default_db_path() -> String {
    "data/pipeline.db".into()
}
fn default_port_attempts() -> u32 {
    30
}
fn default_port_interval() -> u64 {
    1000
}
fn default_health_timeout() -> u64 {
    5
}
