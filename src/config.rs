use crate::domain::{Address, Decimal, PoolId, PoolParams};
use crate::engine::LiquidationParams;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    /// Number of pool jobs allowed to run at once.
    pub worker_pool_size: usize,
    pub close_factor: Decimal,
    pub liquidation_incentive: Decimal,
    /// Per-epoch borrow rate above which a pool's round aborts.
    pub max_borrow_rate: Decimal,
    pub reserve_factor: Decimal,
    pub initial_exchange_rate: Decimal,
    pub epoch_length_ms: u64,
    /// Interval for the built-in flush scheduler; `None` leaves flushing to callers.
    pub flush_interval_ms: Option<u64>,
    pub pools: Vec<PoolId>,
    pub prices: Vec<(PoolId, Decimal)>,
    pub base_rate: Decimal,
    pub rate_slope: Decimal,
    /// Custody balances seeded at startup for the in-memory custodian.
    pub initial_balances: Vec<(PoolId, Address, Decimal)>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let worker_pool_size = env_map
            .get("WORKER_POOL_SIZE")
            .map(|s| s.as_str())
            .unwrap_or("20")
            .parse::<usize>()
            .ok()
            .filter(|k| *k >= 1)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "WORKER_POOL_SIZE".to_string(),
                    "must be an integer >= 1".to_string(),
                )
            })?;

        let close_factor = decimal_var(&env_map, "CLOSE_FACTOR", "0.5")?;
        if !close_factor.is_positive() || close_factor > Decimal::one() {
            return Err(ConfigError::InvalidValue(
                "CLOSE_FACTOR".to_string(),
                "must be in (0, 1]".to_string(),
            ));
        }

        let liquidation_incentive = decimal_var(&env_map, "LIQUIDATION_INCENTIVE", "1.08")?;
        if liquidation_incentive < Decimal::one() {
            return Err(ConfigError::InvalidValue(
                "LIQUIDATION_INCENTIVE".to_string(),
                "must be >= 1".to_string(),
            ));
        }

        let max_borrow_rate = decimal_var(&env_map, "MAX_BORROW_RATE", "0.0005")?;
        if max_borrow_rate.is_negative() {
            return Err(ConfigError::InvalidValue(
                "MAX_BORROW_RATE".to_string(),
                "must not be negative".to_string(),
            ));
        }

        let reserve_factor = decimal_var(&env_map, "RESERVE_FACTOR", "0.1")?;
        if reserve_factor.is_negative() || reserve_factor >= Decimal::one() {
            return Err(ConfigError::InvalidValue(
                "RESERVE_FACTOR".to_string(),
                "must be in [0, 1)".to_string(),
            ));
        }

        let initial_exchange_rate = decimal_var(&env_map, "INITIAL_EXCHANGE_RATE", "1")?;
        if !initial_exchange_rate.is_positive() {
            return Err(ConfigError::InvalidValue(
                "INITIAL_EXCHANGE_RATE".to_string(),
                "must be positive".to_string(),
            ));
        }

        let epoch_length_ms = env_map
            .get("EPOCH_LENGTH_MS")
            .map(|s| s.as_str())
            .unwrap_or("1000")
            .parse::<u64>()
            .ok()
            .filter(|ms| *ms > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "EPOCH_LENGTH_MS".to_string(),
                    "must be a positive integer".to_string(),
                )
            })?;

        let flush_interval_ms = match env_map.get("FLUSH_INTERVAL_MS") {
            Some(s) => Some(s.parse::<u64>().ok().filter(|ms| *ms > 0).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "FLUSH_INTERVAL_MS".to_string(),
                    "must be a positive integer".to_string(),
                )
            })?),
            None => None,
        };

        let pools = parse_pools_from_map(&env_map);
        let prices = parse_prices_from_map(&env_map)?;
        let base_rate = decimal_var(&env_map, "BASE_RATE", "0")?;
        let rate_slope = decimal_var(&env_map, "RATE_SLOPE", "0.0002")?;
        let initial_balances = parse_balances_from_map(&env_map)?;

        Ok(Config {
            port,
            database_path,
            worker_pool_size,
            close_factor,
            liquidation_incentive,
            max_borrow_rate,
            reserve_factor,
            initial_exchange_rate,
            epoch_length_ms,
            flush_interval_ms,
            pools,
            prices,
            base_rate,
            rate_slope,
            initial_balances,
        })
    }

    /// Parameters given to every pool registered at startup.
    pub fn pool_params(&self) -> PoolParams {
        PoolParams {
            reserve_factor: self.reserve_factor,
            initial_exchange_rate: self.initial_exchange_rate,
        }
    }

    pub fn liquidation_params(&self) -> LiquidationParams {
        LiquidationParams {
            close_factor: self.close_factor,
            liquidation_incentive: self.liquidation_incentive,
            max_borrow_rate: self.max_borrow_rate,
        }
    }
}

fn decimal_var(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<Decimal, ConfigError> {
    let raw = env_map.get(key).map(|s| s.as_str()).unwrap_or(default);
    Decimal::from_str_canonical(raw.trim())
        .map_err(|_| ConfigError::InvalidValue(key.to_string(), "must be a decimal".to_string()))
}

fn parse_pools_from_map(env_map: &HashMap<String, String>) -> Vec<PoolId> {
    let mut pools: Vec<PoolId> = env_map
        .get("POOLS")
        .map(|s| {
            s.split(',')
                .map(|p| p.trim())
                .filter(|p| !p.is_empty())
                .map(PoolId::new)
                .collect()
        })
        .unwrap_or_default();
    pools.sort();
    pools.dedup();
    pools
}

/// `POOL=PRICE` pairs separated by commas.
fn parse_prices_from_map(
    env_map: &HashMap<String, String>,
) -> Result<Vec<(PoolId, Decimal)>, ConfigError> {
    let Some(raw) = env_map.get("PRICES") else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(|pair| pair.trim())
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (pool, price) = pair.split_once('=').ok_or_else(|| {
                ConfigError::InvalidValue(
                    "PRICES".to_string(),
                    format!("expected POOL=PRICE, got {}", pair),
                )
            })?;
            let price = Decimal::from_str_canonical(price.trim())
                .ok()
                .filter(|p| p.is_positive())
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "PRICES".to_string(),
                        format!("price for {} must be a positive decimal", pool.trim()),
                    )
                })?;
            Ok((PoolId::new(pool.trim()), price))
        })
        .collect()
}

/// `POOL:ACCOUNT=AMOUNT` triples separated by commas.
fn parse_balances_from_map(
    env_map: &HashMap<String, String>,
) -> Result<Vec<(PoolId, Address, Decimal)>, ConfigError> {
    let Some(raw) = env_map.get("INITIAL_BALANCES") else {
        return Ok(Vec::new());
    };
    let invalid = |entry: &str| {
        ConfigError::InvalidValue(
            "INITIAL_BALANCES".to_string(),
            format!("expected POOL:ACCOUNT=AMOUNT, got {}", entry),
        )
    };
    raw.split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (target, amount) = entry.split_once('=').ok_or_else(|| invalid(entry))?;
            let (pool, account) = target.split_once(':').ok_or_else(|| invalid(entry))?;
            let account = account.trim().parse::<Address>().map_err(|_| invalid(entry))?;
            let amount = Decimal::from_str_canonical(amount.trim())
                .ok()
                .filter(|a| a.is_positive())
                .ok_or_else(|| invalid(entry))?;
            Ok((PoolId::new(pool.trim()), account, amount))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map
    }

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.worker_pool_size, 20);
        assert_eq!(config.close_factor, d("0.5"));
        assert_eq!(config.liquidation_incentive, d("1.08"));
        assert_eq!(config.max_borrow_rate, d("0.0005"));
        assert_eq!(config.reserve_factor, d("0.1"));
        assert_eq!(config.initial_exchange_rate, Decimal::one());
        assert_eq!(config.epoch_length_ms, 1000);
        assert_eq!(config.flush_interval_ms, None);
        assert!(config.pools.is_empty());
        assert!(config.prices.is_empty());
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_zero_worker_pool_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("WORKER_POOL_SIZE".to_string(), "0".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "WORKER_POOL_SIZE"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_close_factor_out_of_range() {
        let mut env_map = setup_required_env();
        env_map.insert("CLOSE_FACTOR".to_string(), "1.5".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "CLOSE_FACTOR"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_pools_and_prices() {
        let mut env_map = setup_required_env();
        env_map.insert("POOLS".to_string(), "USDC, ETH,,USDC".to_string());
        env_map.insert("PRICES".to_string(), "USDC=1, ETH=2000".to_string());
        env_map.insert("FLUSH_INTERVAL_MS".to_string(), "250".to_string());
        let config = Config::from_env_map(env_map).unwrap();

        assert_eq!(config.pools, vec![PoolId::new("ETH"), PoolId::new("USDC")]);
        assert_eq!(
            config.prices,
            vec![
                (PoolId::new("USDC"), d("1")),
                (PoolId::new("ETH"), d("2000")),
            ]
        );
        assert_eq!(config.flush_interval_ms, Some(250));
    }

    #[test]
    fn test_initial_balances() {
        let mut env_map = setup_required_env();
        env_map.insert(
            "INITIAL_BALANCES".to_string(),
            "USDC:0xa=1000, ETH:0xb=2.5".to_string(),
        );
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(
            config.initial_balances,
            vec![
                (PoolId::new("USDC"), Address::new("0xa"), d("1000")),
                (PoolId::new("ETH"), Address::new("0xb"), d("2.5")),
            ]
        );

        let mut env_map = setup_required_env();
        env_map.insert("INITIAL_BALANCES".to_string(), "USDC=5".to_string());
        assert!(matches!(
            Config::from_env_map(env_map),
            Err(ConfigError::InvalidValue(k, _)) if k == "INITIAL_BALANCES"
        ));
    }

    #[test]
    fn test_malformed_price() {
        let mut env_map = setup_required_env();
        env_map.insert("PRICES".to_string(), "USDC".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PRICES"),
            _ => panic!("Expected InvalidValue error"),
        }
    }
}
