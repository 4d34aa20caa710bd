//! Application configuration loaded from environment variables.

use std::time::Duration;

use reservation_store::DEFAULT_TTL_MINUTES;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON log lines, anything else for plain text
/// - `DATABASE_URL`: PostgreSQL URL; unset runs on the in-memory store
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `RESERVATION_TTL_MINUTES`: lifetime used when a request omits one (default: `30`)
/// - `SWEEP_INTERVAL_SECS`: expiry sweep period, `0` disables it (default: `60`)
/// - `SEED_PRODUCTS`: `id:stock` pairs separated by commas, loaded into the
///   in-memory store at start-up (ignored with PostgreSQL)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub reservation_ttl_minutes: i64,
    pub sweep_interval_secs: u64,
    pub seed_products: Vec<(i32, i32)>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: parse_env("PORT").unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: std::env::var("LOG_FORMAT")
                .map(|f| f.eq_ignore_ascii_case("json"))
                .unwrap_or(defaults.log_json),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            reservation_ttl_minutes: parse_env("RESERVATION_TTL_MINUTES")
                .filter(|ttl: &i64| *ttl > 0)
                .unwrap_or(defaults.reservation_ttl_minutes),
            sweep_interval_secs: parse_env("SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.sweep_interval_secs),
            seed_products: std::env::var("SEED_PRODUCTS")
                .map(|raw| parse_seed_products(&raw))
                .unwrap_or(defaults.seed_products),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the sweep period, or `None` when the in-process sweeper is off.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Parses `"1:10,2:5"` into `[(1, 10), (2, 5)]`, skipping malformed entries.
fn parse_seed_products(raw: &str) -> Vec<(i32, i32)> {
    raw.split(',')
        .filter_map(|entry| {
            let (id, stock) = entry.trim().split_once(':')?;
            Some((id.trim().parse().ok()?, stock.trim().parse().ok()?))
        })
        .filter(|(_, stock)| *stock >= 0)
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            database_url: None,
            database_max_connections: 10,
            reservation_ttl_minutes: DEFAULT_TTL_MINUTES,
            sweep_interval_secs: 60,
            seed_products: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(config.database_url.is_none());
        assert_eq!(config.reservation_ttl_minutes, 30);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_sweep_interval() {
        let config = Config::default();
        assert_eq!(config.sweep_interval(), Some(Duration::from_secs(60)));

        let disabled = Config {
            sweep_interval_secs: 0,
            ..Config::default()
        };
        assert_eq!(disabled.sweep_interval(), None);
    }

    #[test]
    fn test_parse_seed_products() {
        assert_eq!(parse_seed_products("1:10, 2:5"), vec![(1, 10), (2, 5)]);
        assert_eq!(parse_seed_products("1:10,bad,3:-1,4:"), vec![(1, 10)]);
        assert!(parse_seed_products("").is_empty());
    }
}
