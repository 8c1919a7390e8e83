use std::{fmt, net::SocketAddr, path::PathBuf};

use url::Url;

use crate::{env_value, env_value_or, DEFAULT_BIND_ADDR};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://stockwatch.db?mode=rwc";
pub const DEFAULT_ZIP_CODE_DATA: &str = "./assets/zipCodeData.txt";
pub const DEFAULT_ITEM_CATALOG: &str = "./assets/itemsAndTokens.txt";
pub const DEFAULT_PLACES_BASE_URL: &str = "https://maps.googleapis.com/maps/api/";
pub const DEFAULT_ITEM_TXN_MAX_ATTEMPTS: u32 = 10;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub zip_code_data: PathBuf,
    pub item_catalog: PathBuf,
    pub places_base_url: Url,
    /// Store vetting is disabled when no key is configured.
    pub maps_api_key: Option<String>,
    pub item_txn_max_attempts: u32,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::from_str(&env_value_or("APP_ENV", "development"))?;
        let bind_addr = env_value_or("APP_BIND_ADDR", DEFAULT_BIND_ADDR)
            .parse()
            .map_err(ConfigError::BindAddress)?;

        let database_url = env_value_or("APP_DATABASE_URL", DEFAULT_DATABASE_URL);
        let zip_code_data = PathBuf::from(env_value_or("APP_ZIP_CODE_DATA", DEFAULT_ZIP_CODE_DATA));
        let item_catalog = PathBuf::from(env_value_or("APP_ITEM_CATALOG", DEFAULT_ITEM_CATALOG));

        let places_base_url =
            Url::parse(&env_value_or("APP_PLACES_BASE_URL", DEFAULT_PLACES_BASE_URL))
                .map_err(ConfigError::PlacesBaseUrl)?;

        let maps_api_key = env_value("MAPS_CLIENT_API_KEY");

        let item_txn_max_attempts = match env_value("APP_ITEM_TXN_MAX_ATTEMPTS") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(value) if value >= 1 => value,
                _ => return Err(ConfigError::ItemTxnAttempts(raw)),
            },
            None => DEFAULT_ITEM_TXN_MAX_ATTEMPTS,
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            zip_code_data,
            item_catalog,
            places_base_url,
            maps_api_key,
            item_txn_max_attempts,
        })
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    PlacesBaseUrl(url::ParseError),
    ItemTxnAttempts(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::PlacesBaseUrl(err) => write!(f, "invalid APP_PLACES_BASE_URL value: {err}"),
            Self::ItemTxnAttempts(value) => write!(
                f,
                "APP_ITEM_TXN_MAX_ATTEMPTS must be a positive integer (got {value})"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
