// Process configuration, loaded once at startup.
//
// Every secret is mandatory: a missing or empty secret aborts the process
// before the HTTP server binds, so no request ever runs against a half
// configured auth stack.

use chrono::Duration;
use std::env;
use thiserror::Error;

const DEFAULT_ACCESS_TTL: &str = "15m";
const DEFAULT_REFRESH_TTL: &str = "7d";
const DEFAULT_OTP_TTL: &str = "10m";
const DEFAULT_CLEANUP_INTERVAL: &str = "1h";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("JWT_SECRET and JWT_REFRESH_SECRET must be different")]
    SharedJwtSecret,
}

/// Runtime environment. Production turns on `secure` cookies and hides
/// internal error details from clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt: JwtConfig,
    pub csrf_secret: String,
    pub otp_ttl: Duration,
    pub cleanup_interval: Duration,
    pub environment: Environment,
}

impl AppConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup (tests use a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| -> Result<String, ConfigError> {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(var))
        };
        let duration = |var: &'static str, default: &str| -> Result<Duration, ConfigError> {
            let raw = lookup(var).unwrap_or_else(|| default.to_string());
            parse_duration(&raw).ok_or_else(|| ConfigError::Invalid {
                var,
                reason: format!("'{raw}' is not a duration (expected e.g. 15m, 7d, 3600)"),
            })
        };

        let database_url = required("DATABASE_URL")?;
        let access_secret = required("JWT_SECRET")?;
        let refresh_secret = required("JWT_REFRESH_SECRET")?;
        let csrf_secret = required("CSRF_SECRET")?;

        if access_secret == refresh_secret {
            return Err(ConfigError::SharedJwtSecret);
        }

        let port = match lookup("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                var: "PORT",
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let environment = lookup("APP_ENV")
            .or_else(|| lookup("NODE_ENV"))
            .map(|v| Environment::parse(&v))
            .unwrap_or(Environment::Development);

        Ok(AppConfig {
            database_url,
            host: lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            jwt: JwtConfig {
                access_secret,
                refresh_secret,
                access_ttl: duration("JWT_EXPIRES_IN", DEFAULT_ACCESS_TTL)?,
                refresh_ttl: duration("JWT_REFRESH_EXPIRES_IN", DEFAULT_REFRESH_TTL)?,
            },
            csrf_secret,
            otp_ttl: duration("OTP_EXPIRES_IN", DEFAULT_OTP_TTL)?,
            cleanup_interval: duration("SESSION_CLEANUP_INTERVAL", DEFAULT_CLEANUP_INTERVAL)?,
            environment,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

/// Parses `90`, `90s`, `15m`, `12h` or `7d`. Returns `None` for anything else.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: i64 = digits.parse().ok()?;

    match unit {
        "" | "s" => Some(Duration::seconds(value)),
        "m" => Some(Duration::minutes(value)),
        "h" => Some(Duration::hours(value)),
        "d" => Some(Duration::days(value)),
        _ => None,
    }
}
