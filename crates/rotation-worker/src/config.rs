use anyhow::{anyhow, bail, Context, Result};
use rotation_core::{
    RotationParams, Sector, DEFAULT_MOMENTUM_WEEKS, DEFAULT_NORMALIZATION_WINDOW_WEEKS,
};
use sector_rotation::DEFAULT_BENCHMARK_SYMBOL;
use std::env;
use std::str::FromStr;

/// What the worker does after start-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Compute the trailing year from scratch and exit
    Init,
    /// One incremental update and exit
    Incremental,
    /// Stay up and run the weekly schedule
    Daemon,
}

impl FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "init" => Ok(RunMode::Init),
            "incremental" => Ok(RunMode::Incremental),
            "daemon" => Ok(RunMode::Daemon),
            other => Err(anyhow!(
                "Unknown ROTATION_MODE '{}' (expected daemon, incremental or init)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub polygon_api_key: String,
    pub database_url: String,
    pub benchmark_symbol: String,
    pub sectors: Vec<Sector>,
    pub params: RotationParams,
    pub mode: RunMode,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            polygon_api_key: lookup("POLYGON_API_KEY")
                .filter(|k| !k.trim().is_empty())
                .context("POLYGON_API_KEY not set")?,
            database_url: var("DATABASE_URL", "sqlite:sector_rotation.db"),
            benchmark_symbol: var("BENCHMARK_SYMBOL", DEFAULT_BENCHMARK_SYMBOL)
                .trim()
                .to_uppercase(),
            sectors: match lookup("ROTATION_SECTORS") {
                Some(list) => parse_sectors(&list)?,
                None => Sector::standard_sectors(),
            },
            params: RotationParams {
                momentum_weeks: var("MOMENTUM_WEEKS", &DEFAULT_MOMENTUM_WEEKS.to_string())
                    .parse()
                    .context("MOMENTUM_WEEKS must be a positive integer")?,
                normalization_window_weeks: var(
                    "NORMALIZATION_WINDOW_WEEKS",
                    &DEFAULT_NORMALIZATION_WINDOW_WEEKS.to_string(),
                )
                .parse()
                .context("NORMALIZATION_WINDOW_WEEKS must be a positive integer")?,
            },
            mode: var("ROTATION_MODE", "daemon").parse()?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.params.validate()?;
        if self.benchmark_symbol.is_empty() {
            bail!("BENCHMARK_SYMBOL cannot be empty");
        }
        if self.sectors.is_empty() {
            bail!("ROTATION_SECTORS must name at least one sector");
        }
        Ok(())
    }
}

/// Comma-separated ETF symbols from the standard sector catalog.
fn parse_sectors(list: &str) -> Result<Vec<Sector>> {
    let mut sectors: Vec<Sector> = Vec::new();
    for symbol in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let sector = Sector::from_etf_symbol(symbol)
            .ok_or_else(|| anyhow!("Unknown sector ETF in ROTATION_SECTORS: {}", symbol))?;
        if !sectors.contains(&sector) {
            sectors.push(sector);
        }
    }
    Ok(sectors)
}
