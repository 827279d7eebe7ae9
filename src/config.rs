use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerBackend {
    Postgres,
    Memory,
}

impl FromStr for BrokerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("unknown broker backend {:?}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub listen_addr: SocketAddr,
    pub provider_base_url: String,
    pub provider_name: String,
    pub provider_timeout: Duration,
    pub topic: String,
    pub topic_partitions: u32,
    pub topic_replication_factor: u16,
    pub consumer_group_id: String,
    pub broker_backend: BrokerBackend,
    pub poll_fixed_rate: Duration,
    pub poll_initial_delay: Duration,
    pub default_base_currency: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| -> String {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let parse = |key: &str, default: &str| -> Result<u64> {
            get(key, default)
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{} must be a non-negative integer", key))
        };

        let database_url = lookup("DATABASE_URL")
            .filter(|value| !value.trim().is_empty())
            .context("DATABASE_URL must be set")?;

        let listen_addr = get("LISTEN_ADDR", "0.0.0.0:8080")
            .parse()
            .context("LISTEN_ADDR must be a socket address")?;

        let topic_partitions = u32::try_from(parse("TOPIC_PARTITIONS", "3")?)
            .context("TOPIC_PARTITIONS is too large")?;
        if topic_partitions == 0 {
            bail!("TOPIC_PARTITIONS must be at least 1");
        }
        let topic_replication_factor = u16::try_from(parse("TOPIC_REPLICATION_FACTOR", "1")?)
            .context("TOPIC_REPLICATION_FACTOR is too large")?;
        if topic_replication_factor == 0 {
            bail!("TOPIC_REPLICATION_FACTOR must be at least 1");
        }

        let poll_fixed_rate = Duration::from_millis(parse("POLL_FIXED_RATE_MS", "60000")?);
        if poll_fixed_rate.is_zero() {
            bail!("POLL_FIXED_RATE_MS must be greater than zero");
        }

        let default_base_currency = get("DEFAULT_BASE_CURRENCY", "USD").trim().to_uppercase();

        Ok(Self {
            database_url,
            database_max_connections: u32::try_from(parse("DATABASE_MAX_CONNECTIONS", "5")?)
                .context("DATABASE_MAX_CONNECTIONS is too large")?,
            listen_addr,
            provider_base_url: get(
                "PROVIDER_BASE_URL",
                "https://api.exchangerate-api.com/v4/latest",
            ),
            provider_name: get("PROVIDER_NAME", crate::normalizer::DEFAULT_PROVIDER),
            provider_timeout: Duration::from_secs(parse("PROVIDER_TIMEOUT_SECS", "10")?),
            topic: get("RATES_TOPIC", "exchange-rates"),
            topic_partitions,
            topic_replication_factor,
            consumer_group_id: get("CONSUMER_GROUP_ID", "exchange-rate-group"),
            broker_backend: get("BROKER_BACKEND", "postgres").parse()?,
            poll_fixed_rate,
            poll_initial_delay: Duration::from_millis(parse("POLL_INITIAL_DELAY_MS", "5000")?),
            default_base_currency,
        })
    }
}
