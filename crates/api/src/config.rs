//! API server configuration

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub jwt_secret: String,
    /// Lifetime of login tokens, in hours.
    pub jwt_expiry_hours: i64,
    /// Lifetime of single-use download tokens, in minutes.
    pub download_token_minutes: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_expiry_hours = std::env::var("JWT_EXPIRY_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(24);
        let download_token_minutes = std::env::var("DOWNLOAD_TOKEN_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            database_url,
            bind_address,
            jwt_secret,
            jwt_expiry_hours,
            download_token_minutes,
        })
    }
}
