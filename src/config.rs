//! Runtime configuration loaded from the environment (and `.env` when present).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_JWT_SECRET: &str = "docgen-jwt-secret-change-in-production-0123456789";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
    #[error("SWEEP_MIN_FILE_AGE_SECONDS ({min_age}s) must cover the longest batch ({longest_batch}s)")]
    SweepAgeTooShort { min_age: u64, longest_batch: u64 },
}

/// Token signing settings shared by login, refresh and request validation.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl: chrono::Duration,
}

/// Failed-login threshold and lockout window.
#[derive(Debug, Clone, Copy)]
pub struct LockoutConfig {
    pub threshold: i32,
    pub duration: chrono::Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            duration: chrono::Duration::minutes(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub initial_delay: Duration,
    pub interval: Duration,
    /// Files younger than this are never reclaimed, so an in-flight batch keeps its files.
    pub min_file_age: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5 * 60),
            interval: Duration::from_secs(24 * 60 * 60),
            min_file_age: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub bind_address: String,
    pub documents_path: PathBuf,
    pub jwt: JwtConfig,
    pub lockout: LockoutConfig,
    pub render_timeout: Duration,
    pub chrome_path: Option<PathBuf>,
    pub sweeper: SweeperConfig,
    pub max_batch_size: usize,
    pub bcrypt_cost: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            log::warn!("JWT_SECRET not set, using default secret. SET THIS IN PRODUCTION!");
            DEFAULT_JWT_SECRET.to_string()
        });

        let config = Self {
            database_url,
            db_max_connections: positive_or("DB_MAX_CONNECTIONS", 20)?,
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            documents_path: env::var("DOCUMENTS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./storage/documents")),
            jwt: JwtConfig {
                secret,
                issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "docgen-server".to_string()),
                audience: env::var("JWT_AUDIENCE").unwrap_or_else(|_| "docgen-client".to_string()),
                access_token_ttl: scaled("JWT_EXPIRY_MINUTES", 60, chrono::Duration::try_minutes)?,
                refresh_token_ttl: scaled("REFRESH_TOKEN_EXPIRY_DAYS", 7, chrono::Duration::try_days)?,
            },
            lockout: LockoutConfig {
                threshold: positive_or("LOCKOUT_THRESHOLD", 5)?,
                duration: scaled("LOCKOUT_DURATION_MINUTES", 15, chrono::Duration::try_minutes)?,
            },
            render_timeout: Duration::from_secs(positive_or("RENDER_TIMEOUT_SECONDS", 30)?),
            chrome_path: env::var("CHROME_PATH").ok().map(PathBuf::from),
            sweeper: SweeperConfig {
                initial_delay: Duration::from_secs(parse_or("SWEEP_INITIAL_DELAY_SECONDS", 300)?),
                interval: Duration::from_secs(scaled("SWEEP_INTERVAL_HOURS", 24, |hours: u64| {
                    hours.checked_mul(3600)
                })?),
                min_file_age: Duration::from_secs(parse_or("SWEEP_MIN_FILE_AGE_SECONDS", 3600)?),
            },
            max_batch_size: positive_or("MAX_BATCH_SIZE", 100)?,
            bcrypt_cost: parse_or("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks. The sweeper's grace period has to outlast the slowest
    /// possible batch, otherwise it can reclaim files whose rows are about to commit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let longest_batch = u32::try_from(self.max_batch_size)
            .ok()
            .and_then(|items| self.render_timeout.checked_mul(items))
            .unwrap_or(Duration::MAX);

        if self.sweeper.min_file_age < longest_batch {
            return Err(ConfigError::SweepAgeTooShort {
                min_age: self.sweeper.min_file_age.as_secs(),
                longest_batch: longest_batch.as_secs(),
            });
        }
        Ok(())
    }
}

/// Read `name` from the environment, falling back to `default` when unset.
fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

/// Like `parse_or`, but zero and negative values are rejected.
fn positive_or<T: FromStr + PartialOrd + Default>(
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    let value = parse_or(name, default)?;
    if value <= T::default() {
        return Err(invalid(name));
    }
    Ok(value)
}

/// Read a positive count and convert it to a unit, rejecting overflow.
fn scaled<T, U>(
    name: &'static str,
    default: T,
    convert: impl FnOnce(T) -> Option<U>,
) -> Result<U, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    convert(positive_or(name, default)?).ok_or_else(|| invalid(name))
}

fn invalid(name: &'static str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: env::var(name).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_uses_default_when_unset() {
        let value: u64 = parse_or("DOCGEN_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_or_rejects_garbage() {
        env::set_var("DOCGEN_TEST_GARBAGE_VARIABLE", "not-a-number");
        let result: Result<u64, _> = parse_or("DOCGEN_TEST_GARBAGE_VARIABLE", 1);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_zero_and_negative_values_are_rejected() {
        env::set_var("DOCGEN_TEST_ZERO_VARIABLE", "0");
        env::set_var("DOCGEN_TEST_NEGATIVE_VARIABLE", "-3");

        let zero: Result<u64, _> = positive_or("DOCGEN_TEST_ZERO_VARIABLE", 1);
        let negative: Result<i64, _> = positive_or("DOCGEN_TEST_NEGATIVE_VARIABLE", 1);

        assert!(matches!(zero, Err(ConfigError::Invalid { .. })));
        assert!(matches!(negative, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_overflowing_interval_is_rejected() {
        env::set_var("DOCGEN_TEST_HUGE_HOURS", u64::MAX.to_string());
        let result = scaled("DOCGEN_TEST_HUGE_HOURS", 24, |hours: u64| hours.checked_mul(3600));
        assert!(matches!(result, Err(ConfigError::Invalid { name, .. }) if name == "DOCGEN_TEST_HUGE_HOURS"));
    }

    #[test]
    fn test_overflowing_minutes_are_rejected() {
        env::set_var("DOCGEN_TEST_HUGE_MINUTES", i64::MAX.to_string());
        let result = scaled("DOCGEN_TEST_HUGE_MINUTES", 15, chrono::Duration::try_minutes);
        assert!(result.is_err());
    }

    fn config_with(min_file_age: Duration, render_timeout: Duration, max_batch_size: usize) -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/docgen".to_string(),
            db_max_connections: 5,
            bind_address: "127.0.0.1:0".to_string(),
            documents_path: PathBuf::from("./storage/documents"),
            jwt: JwtConfig {
                secret: DEFAULT_JWT_SECRET.to_string(),
                issuer: "docgen-server".to_string(),
                audience: "docgen-client".to_string(),
                access_token_ttl: chrono::Duration::minutes(60),
                refresh_token_ttl: chrono::Duration::days(7),
            },
            lockout: LockoutConfig::default(),
            render_timeout,
            chrome_path: None,
            sweeper: SweeperConfig {
                min_file_age,
                ..SweeperConfig::default()
            },
            max_batch_size,
            bcrypt_cost: 4,
        }
    }

    #[test]
    fn test_default_sweep_age_covers_longest_batch() {
        let config = config_with(Duration::from_secs(3600), Duration::from_secs(30), 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sweep_age_shorter_than_longest_batch_is_rejected() {
        let config = config_with(Duration::from_secs(600), Duration::from_secs(30), 100);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SweepAgeTooShort { min_age: 600, longest_batch: 3000 })
        ));
    }

    #[test]
    fn test_lockout_defaults() {
        let lockout = LockoutConfig::default();
        assert_eq!(lockout.threshold, 5);
        assert_eq!(lockout.duration, chrono::Duration::minutes(15));
    }
}
