use crate::domain::{AssetId, DisposalMethod};
use crate::engine::{DisposalEngine, HistoryFold, HistoryReconstructor, ShortfallPolicy};
use crate::gateway::{CachedPriceGateway, CoinGeckoConfig, CoinGeckoGateway, PriceCache};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub price_api_url: String,
    pub price_vs_currency: String,
    pub price_batch_size: usize,
    pub price_batch_delay_ms: u64,
    pub price_rate_limit_wait_ms: u64,
    pub price_max_rate_limit_retries: u32,
    pub price_max_in_flight: usize,
    pub price_cache_ttl_ms: u64,
    pub disposal_method: DisposalMethod,
    pub include_fees: bool,
    pub shortfall_policy: ShortfallPolicy,
    pub history_fold: HistoryFold,
    pub history_concurrency: usize,
    /// Assets valued by the history reconstructor; empty means all.
    pub asset_ids: Vec<AssetId>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let price_api_url = env_map
            .get("PRICE_API_URL")
            .cloned()
            .unwrap_or_else(|| "https://api.coingecko.com/api/v3".to_string())
            .trim_end_matches('/')
            .to_string();

        let price_vs_currency = env_map
            .get("PRICE_VS_CURRENCY")
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "usd".to_string());

        let price_batch_size = parse_positive(&env_map, "PRICE_BATCH_SIZE", 5)?;
        let price_batch_delay_ms = parse_number(&env_map, "PRICE_BATCH_DELAY_MS", 1_000u64)?;
        let price_rate_limit_wait_ms =
            parse_number(&env_map, "PRICE_RATE_LIMIT_WAIT_MS", 60_000u64)?;
        let price_max_rate_limit_retries =
            parse_number(&env_map, "PRICE_MAX_RATE_LIMIT_RETRIES", 3u32)?;
        let price_max_in_flight = parse_positive(&env_map, "PRICE_MAX_IN_FLIGHT", 5)?;
        let price_cache_ttl_ms = parse_number(&env_map, "PRICE_CACHE_TTL_MS", 300_000u64)?;

        let disposal_method = env_map
            .get("DISPOSAL_METHOD")
            .map(|s| s.as_str())
            .unwrap_or("fifo")
            .parse::<DisposalMethod>()
            .map_err(|e| ConfigError::InvalidValue("DISPOSAL_METHOD".to_string(), e))?;

        let include_fees = match env_map
            .get("INCLUDE_FEES")
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
            .unwrap_or("true")
        {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            other => {
                return Err(ConfigError::InvalidValue(
                    "INCLUDE_FEES".to_string(),
                    format!("must be true or false, got {}", other),
                ))
            }
        };

        let shortfall_policy = match env_map
            .get("SHORTFALL_POLICY")
            .map(|s| s.as_str())
            .unwrap_or("reject")
        {
            "reject" => ShortfallPolicy::Reject,
            "truncate" => ShortfallPolicy::Truncate,
            other => {
                return Err(ConfigError::InvalidValue(
                    "SHORTFALL_POLICY".to_string(),
                    format!("must be reject or truncate, got {}", other),
                ))
            }
        };

        let history_fold = env_map
            .get("HISTORY_FOLD")
            .map(|s| s.as_str())
            .unwrap_or("average_cost")
            .parse::<HistoryFold>()
            .map_err(|e| ConfigError::InvalidValue("HISTORY_FOLD".to_string(), e))?;

        let history_concurrency = parse_positive(&env_map, "HISTORY_CONCURRENCY", 1)?;

        let asset_ids = parse_asset_ids_from_map(&env_map)?;

        Ok(Config {
            price_api_url,
            price_vs_currency,
            price_batch_size,
            price_batch_delay_ms,
            price_rate_limit_wait_ms,
            price_max_rate_limit_retries,
            price_max_in_flight,
            price_cache_ttl_ms,
            disposal_method,
            include_fees,
            shortfall_policy,
            history_fold,
            history_concurrency,
            asset_ids,
        })
    }

    pub fn disposal_engine(&self) -> DisposalEngine {
        DisposalEngine::new(self.disposal_method)
            .with_fees(self.include_fees)
            .with_shortfall(self.shortfall_policy)
    }

    pub fn history_reconstructor(&self) -> HistoryReconstructor {
        HistoryReconstructor::new(self.disposal_method)
            .with_engine(self.disposal_engine())
            .with_fold(self.history_fold)
            .with_concurrency(self.history_concurrency)
            .with_assets(self.asset_ids.iter().cloned())
    }

    pub fn coingecko_config(&self) -> CoinGeckoConfig {
        CoinGeckoConfig {
            base_url: self.price_api_url.clone(),
            vs_currency: self.price_vs_currency.clone(),
            batch_size: self.price_batch_size,
            batch_delay: Duration::from_millis(self.price_batch_delay_ms),
            rate_limit_wait: Duration::from_millis(self.price_rate_limit_wait_ms),
            max_rate_limit_retries: self.price_max_rate_limit_retries,
            max_in_flight: self.price_max_in_flight,
            ..CoinGeckoConfig::default()
        }
    }

    /// CoinGecko gateway behind a fresh cache with the configured TTL.
    pub fn coingecko_gateway(&self) -> CachedPriceGateway<CoinGeckoGateway> {
        let cache = Arc::new(PriceCache::new(Duration::from_millis(
            self.price_cache_ttl_ms,
        )));
        CachedPriceGateway::new(CoinGeckoGateway::new(self.coingecko_config()), cache)
    }
}

fn parse_number<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), "must be a non-negative integer".to_string())
        }),
        None => Ok(default),
    }
}

fn parse_positive(
    env_map: &HashMap<String, String>,
    key: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    let value = parse_number(env_map, key, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

fn parse_asset_ids_from_map(
    env_map: &HashMap<String, String>,
) -> Result<Vec<AssetId>, ConfigError> {
    let ids: Vec<String> = if let Some(ids_str) = env_map.get("ASSET_IDS") {
        ids_str.split(',').map(|s| s.trim().to_string()).collect()
    } else if let Some(file_path) = env_map.get("ASSET_IDS_FILE") {
        let content = std::fs::read_to_string(file_path).map_err(|_| {
            ConfigError::InvalidValue(
                "ASSET_IDS_FILE".to_string(),
                "file not found or unreadable".to_string(),
            )
        })?;
        content.lines().map(|line| line.trim().to_string()).collect()
    } else {
        Vec::new()
    };

    Ok(ids
        .into_iter()
        .filter(|s| !s.is_empty())
        .map(AssetId::new)
        .collect())
}
