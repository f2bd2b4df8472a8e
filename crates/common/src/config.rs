/// All configuration recognized by the fabric, loaded from
/// environment variables at startup. Unlike ambient infrastructure
/// settings (database URL, chat bot token), every risk/timing knob ships
/// with the spec's default and is optional to override.
#[derive(Debug, Clone)]
pub struct Config {
    // Ambient infrastructure
    pub database_url: String,
    pub chat_bot_token: Option<String>,
    pub chat_channel: Option<String>,
    pub trading_mode: crate::TradingMode,
    pub broker_base_url: Option<String>,
    pub broker_api_key: Option<String>,
    pub broker_api_secret: Option<String>,
    pub paper_slippage_bps: f64,
    pub initial_portfolio_value: f64,

    // Risk Gate
    pub max_drawdown_pct: f64,
    pub max_daily_loss_pct: f64,
    pub max_positions: usize,
    pub max_correlation: f64,
    pub max_sector_concentration: f64,
    pub max_leverage: f64,

    // Signal validation
    pub min_rr: f64,
    pub min_move_pct: f64,
    pub max_stop_pct: f64,

    // Position Manager
    pub trail_pct: f64,
    pub trade_notional: f64,
    pub entry_timeout_min: i64,
    pub max_hold_hours: i64,
    pub single_trade_mode: bool,

    // Arbiter
    pub layer1_buffer_sec: i64,
    pub layer2_batch_sec: i64,

    // Order Verification Loop
    pub verification_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub max_retry_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://fabric.db".to_string(),
            chat_bot_token: None,
            chat_channel: None,
            trading_mode: crate::TradingMode::Paper,
            broker_base_url: None,
            broker_api_key: None,
            broker_api_secret: None,
            paper_slippage_bps: 5.0,
            initial_portfolio_value: 1_000_000.0,
            max_drawdown_pct: 0.15,
            max_daily_loss_pct: 0.03,
            max_positions: 5,
            max_correlation: 0.70,
            max_sector_concentration: 0.40,
            max_leverage: 2.0,
            min_rr: 1.5,
            min_move_pct: 0.02,
            max_stop_pct: 0.02,
            trail_pct: 0.01,
            trade_notional: 100_000.0,
            entry_timeout_min: 30,
            max_hold_hours: 6,
            single_trade_mode: false,
            layer1_buffer_sec: 35,
            layer2_batch_sec: 60,
            verification_timeout_ms: 30_000,
            retry_delay_ms: 2_000,
            max_retry_attempts: 3,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, loading `.env` if
    /// present. Ambient infrastructure variables use spec defaults when
    /// unset except `database_url`, which always resolves to a usable
    /// default so the fabric can run with the bundled SQLite file.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Self {
            database_url: optional_env("DATABASE_URL").unwrap_or(defaults.database_url),
            chat_bot_token: optional_env("CHAT_BOT_TOKEN"),
            chat_channel: optional_env("CHAT_CHANNEL"),
            trading_mode: match optional_env("TRADING_MODE").as_deref() {
                Some("live") => crate::TradingMode::Live,
                Some("paper") | None => crate::TradingMode::Paper,
                Some(other) => {
                    panic!("TRADING_MODE must be 'paper' or 'live', got: '{other}'")
                }
            },
            broker_base_url: optional_env("BROKER_BASE_URL"),
            broker_api_key: optional_env("BROKER_API_KEY"),
            broker_api_secret: optional_env("BROKER_API_SECRET"),
            paper_slippage_bps: parsed_or("PAPER_SLIPPAGE_BPS", defaults.paper_slippage_bps),
            initial_portfolio_value: parsed_or(
                "INITIAL_PORTFOLIO_VALUE",
                defaults.initial_portfolio_value,
            ),
            max_drawdown_pct: parsed_or("MAX_DRAWDOWN_PCT", defaults.max_drawdown_pct),
            max_daily_loss_pct: parsed_or("MAX_DAILY_LOSS_PCT", defaults.max_daily_loss_pct),
            max_positions: parsed_or("MAX_POSITIONS", defaults.max_positions),
            max_correlation: parsed_or("MAX_CORRELATION", defaults.max_correlation),
            max_sector_concentration: parsed_or(
                "MAX_SECTOR_CONCENTRATION",
                defaults.max_sector_concentration,
            ),
            max_leverage: parsed_or("MAX_LEVERAGE", defaults.max_leverage),
            min_rr: parsed_or("MIN_RR", defaults.min_rr),
            min_move_pct: parsed_or("MIN_MOVE_PCT", defaults.min_move_pct),
            max_stop_pct: parsed_or("MAX_STOP_PCT", defaults.max_stop_pct),
            trail_pct: parsed_or("TRAIL_PCT", defaults.trail_pct),
            trade_notional: parsed_or("TRADE_NOTIONAL", defaults.trade_notional),
            entry_timeout_min: parsed_or("ENTRY_TIMEOUT_MIN", defaults.entry_timeout_min),
            max_hold_hours: parsed_or("MAX_HOLD_HOURS", defaults.max_hold_hours),
            single_trade_mode: parsed_or("SINGLE_TRADE_MODE", defaults.single_trade_mode),
            layer1_buffer_sec: parsed_or("LAYER1_BUFFER_SEC", defaults.layer1_buffer_sec),
            layer2_batch_sec: parsed_or("LAYER2_BATCH_SEC", defaults.layer2_batch_sec),
            verification_timeout_ms: parsed_or(
                "VERIFICATION_TIMEOUT_MS",
                defaults.verification_timeout_ms,
            ),
            retry_delay_ms: parsed_or("RETRY_DELAY_MS", defaults.retry_delay_ms),
            max_retry_attempts: parsed_or("MAX_RETRY_ATTEMPTS", defaults.max_retry_attempts),
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    optional_env(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
