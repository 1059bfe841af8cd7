//! Layered settings: built-in defaults, then an optional TOML file, then
//! `GAPBOT__SECTION__KEY` environment variables. Credentials never live
//! here; adapters read them from the environment (loaded via dotenvy).

use anyhow::Context;
use chrono::NaiveTime;
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::api::alpaca::ALPACA_DATA_API;
use crate::api::halt_feed::NASDAQ_HALTS_URL;
use crate::api::polygon::POLYGON_API_BASE;
use crate::api::webull::WEBULL_API_BASE;
use crate::api::QuoteProvider;
use crate::calendar::{parse_clock, TradingCalendar};
use crate::screening::ScreeningThresholds;

pub const DEFAULT_CONFIG_PATH: &str = "config/gapbot";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// IANA timezone of the exchange
    pub timezone: String,
    /// Exchange-local time after which every resting order is cancelled
    pub cancel_deadline: String,
    /// Exchange-local time at which the live loop stops
    pub session_end: String,
    pub poll_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timezone: "America/New_York".to_string(),
            cancel_deadline: "10:00".to_string(),
            session_end: "15:45".to_string(),
            poll_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitSettings {
    pub take_profit_pct: f64,
    /// Offset of the initial protective stop from entry
    pub initial_stop_pct: f64,
    /// Existing stop this close to the target counts as already in place
    pub stop_tolerance: f64,
}

impl Default for ExitSettings {
    fn default() -> Self {
        Self {
            take_profit_pct: 0.07,
            initial_stop_pct: 0.025,
            stop_tolerance: 0.005,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HaltSettings {
    pub feed_url: String,
    pub poll_interval_secs: u64,
    /// How long after an unhalt the protective stop may still fire
    pub resume_window_secs: i64,
    /// Protective stop distance beyond the current price
    pub resume_stop_offset_pct: f64,
}

impl Default for HaltSettings {
    fn default() -> Self {
        Self {
            feed_url: NASDAQ_HALTS_URL.to_string(),
            poll_interval_secs: 30,
            resume_window_secs: 300,
            resume_stop_offset_pct: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntrySettings {
    pub kelly: f64,
    pub max_loss_pct: f64,
    pub max_position_pct: f64,
    pub stop_loss_pct: f64,
    /// Limit price markup over the quote midpoint
    pub limit_markup_pct: f64,
}

impl Default for EntrySettings {
    fn default() -> Self {
        Self {
            kelly: 0.2,
            max_loss_pct: 0.02,
            max_position_pct: 0.05,
            stop_loss_pct: 0.025,
            limit_markup_pct: 0.002,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub orders_per_second: u32,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            base_url: WEBULL_API_BASE.to_string(),
            timeout_secs: 5,
            orders_per_second: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteSettings {
    pub provider: QuoteProvider,
    pub alpaca_url: String,
    pub polygon_url: String,
}

impl Default for QuoteSettings {
    fn default() -> Self {
        Self {
            provider: QuoteProvider::Alpaca,
            alpaca_url: ALPACA_DATA_API.to_string(),
            polygon_url: POLYGON_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalSettings {
    pub dir: String,
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            dir: "logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub session: SessionSettings,
    pub exits: ExitSettings,
    pub halts: HaltSettings,
    pub screening: ScreeningThresholds,
    pub entry: EntrySettings,
    pub broker: BrokerSettings,
    pub quotes: QuoteSettings,
    pub journal: JournalSettings,
}

impl Settings {
    /// Load defaults, then `path` (or `config/gapbot.*` if present), then environment
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_PATH).required(false)),
        };

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("GAPBOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.timezone()?;
        let cutoff = self.cancel_deadline()?;
        let end = self.session_end()?;
        if cutoff >= end {
            anyhow::bail!(
                "cancel_deadline {} must be before session_end {}",
                cutoff,
                end
            );
        }
        if !(self.exits.take_profit_pct > 0.0 && self.exits.take_profit_pct < 1.0) {
            anyhow::bail!("take_profit_pct must be in (0, 1), got {}", self.exits.take_profit_pct);
        }
        if !(self.exits.initial_stop_pct > 0.0 && self.exits.initial_stop_pct < 1.0) {
            anyhow::bail!("initial_stop_pct must be in (0, 1), got {}", self.exits.initial_stop_pct);
        }
        if self.session.poll_interval_secs == 0 || self.halts.poll_interval_secs == 0 {
            anyhow::bail!("poll intervals must be at least one second");
        }
        if self.halts.resume_window_secs <= 0 {
            anyhow::bail!("resume_window_secs must be positive");
        }
        Ok(())
    }

    pub fn timezone(&self) -> anyhow::Result<Tz> {
        self.session
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("unknown timezone '{}': {}", self.session.timezone, e))
    }

    pub fn calendar(&self) -> anyhow::Result<TradingCalendar> {
        Ok(TradingCalendar::new(self.timezone()?))
    }

    pub fn cancel_deadline(&self) -> anyhow::Result<NaiveTime> {
        parse_clock(&self.session.cancel_deadline)
    }

    pub fn session_end(&self) -> anyhow::Result<NaiveTime> {
        parse_clock(&self.session.session_end)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.broker.timeout_secs.max(1))
    }
}
