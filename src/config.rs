// ⚙️ Settings - environment driven configuration
//
// Read once at startup (after loading an optional .env file):
//   RANK_SPLIT_DB           SQLite file              (default: rank-split.db)
//   RANK_SPLIT_BIND         server listen address    (default: 0.0.0.0:5000)
//   RANK_SPLIT_RATE_POLICY  tolerant | strict        (default: tolerant)
//   RANK_SPLIT_RATE_STEP    TUI slider step, percent (default: 0.1)

use crate::settlement::RatePolicy;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;

pub const DEFAULT_DB_PATH: &str = "rank-split.db";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:5000";
pub const DEFAULT_RATE_STEP: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub bind_address: String,
    pub rate_policy: RatePolicy,
    pub rate_step: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            rate_policy: RatePolicy::default(),
            rate_step: DEFAULT_RATE_STEP,
        }
    }
}

impl Settings {
    /// Load `.env` (if any) and read settings from the process environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_vars(std::env::vars().collect())
    }

    /// Build settings from an explicit variable map
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(path) = vars.get("RANK_SPLIT_DB") {
            settings.db_path = PathBuf::from(path);
        }

        if let Some(bind) = vars.get("RANK_SPLIT_BIND") {
            settings.bind_address = bind.clone();
        }

        if let Some(policy) = vars.get("RANK_SPLIT_RATE_POLICY") {
            settings.rate_policy = policy
                .parse()
                .context("Invalid RANK_SPLIT_RATE_POLICY")?;
        }

        if let Some(step) = vars.get("RANK_SPLIT_RATE_STEP") {
            let step: f64 = step
                .trim()
                .parse()
                .with_context(|| format!("Invalid RANK_SPLIT_RATE_STEP: '{}'", step))?;
            if !(step > 0.0 && step <= 100.0) {
                anyhow::bail!("RANK_SPLIT_RATE_STEP must be in (0, 100], got {}", step);
            }
            settings.rate_step = step;
        }

        Ok(settings)
    }
}

/// Install the global tracing subscriber (RUST_LOG overrides the default filter)
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,rank_split=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
