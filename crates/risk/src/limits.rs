use common::{Config, Error, Result};

/// Validated risk-envelope configuration. Constructed
/// once at startup; each bound is checked against an admissible range so a
/// misconfigured deployment fails fast instead of silently admitting every
/// trade or none at all.
#[derive(Debug, Clone, Copy)]
pub struct RiskLimits {
    pub max_drawdown_pct: f64,
    pub max_daily_loss_pct: f64,
    pub max_positions: usize,
    pub max_correlation: f64,
    pub max_sector_concentration: f64,
    pub max_leverage: f64,
}

impl RiskLimits {
    pub fn validate(self) -> Result<Self> {
        fn in_unit_range(name: &str, v: f64) -> Result<()> {
            if v > 0.0 && v <= 1.0 {
                Ok(())
            } else {
                Err(Error::Config(format!(
                    "{name} must be in (0.0, 1.0], got {v}"
                )))
            }
        }

        in_unit_range("max_drawdown_pct", self.max_drawdown_pct)?;
        in_unit_range("max_daily_loss_pct", self.max_daily_loss_pct)?;
        in_unit_range("max_correlation", self.max_correlation)?;
        in_unit_range("max_sector_concentration", self.max_sector_concentration)?;

        if self.max_positions == 0 {
            return Err(Error::Config("max_positions must be >= 1".into()));
        }
        if self.max_leverage < 1.0 {
            return Err(Error::Config("max_leverage must be >= 1.0".into()));
        }

        Ok(self)
    }
}

impl From<&Config> for RiskLimits {
    fn from(cfg: &Config) -> Self {
        Self {
            max_drawdown_pct: cfg.max_drawdown_pct,
            max_daily_loss_pct: cfg.max_daily_loss_pct,
            max_positions: if cfg.single_trade_mode {
                1
            } else {
                cfg.max_positions
            },
            max_correlation: cfg.max_correlation,
            max_sector_concentration: cfg.max_sector_concentration,
            max_leverage: cfg.max_leverage,
        }
    }
}
