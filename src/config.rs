use std::env;
use std::fmt;

// Au-delà, la date d'expiration des jetons sortirait de la plage de chrono.
pub const MAX_TOKEN_TTL_DAYS: i64 = 3650;

/// Runtime settings, read once at startup and shared with handlers through `web::Data`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
    pub frontend_url_prod: String,
    pub frontend_url_dev: String,
    pub db_pool_max_size: u32,
    pub token_ttl_days: i64,
}

#[derive(Debug, PartialEq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => {
                write!(f, "{} must be set in environment variables or .env file", key)
            }
            ConfigError::Invalid { key, value } => write!(f, "{} has an invalid value: {}", key, value),
        }
    }
}

impl std::error::Error for ConfigError {}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port = parse_number(&lookup, "PORT", 8080u16)?;
        let db_pool_max_size = parse_number(&lookup, "DB_POOL_MAX_SIZE", 10u32)?;
        let token_ttl_days = parse_number(&lookup, "TOKEN_TTL_DAYS", 30i64)?;
        if !(1..=MAX_TOKEN_TTL_DAYS).contains(&token_ttl_days) {
            return Err(ConfigError::Invalid {
                key: "TOKEN_TTL_DAYS",
                value: token_ttl_days.to_string(),
            });
        }

        Ok(AppConfig {
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("SECRET_KEY")?,
            host: or_default("HOST", "0.0.0.0"),
            port,
            frontend_url_prod: or_default("FRONTEND_URL_PROD", "https://gtd.example.com"),
            frontend_url_dev: or_default("FRONTEND_URL_DEV", "http://localhost:3000"),
            db_pool_max_size,
            token_ttl_days,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_number<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}
