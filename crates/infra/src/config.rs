//! Process configuration from environment variables (optionally loaded from
//! a `.env` file).
//!
//! | Variable                   | Default          |
//! |----------------------------|------------------|
//! | `BIND_ADDR`                | `0.0.0.0:8080`   |
//! | `JWT_SECRET`               | dev secret, warn |
//! | `DATABASE_URL`             | in-memory store  |
//! | `DATABASE_MAX_CONNECTIONS` | `5`              |
//! | `POINT_OF_SALE`            | `1`              |
//! | `DUPLICATE_WINDOW_MINUTES` | `10`             |

use std::net::SocketAddr;

use thiserror::Error;

pub const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    /// Postgres connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Point of sale used to number sale invoices.
    pub point_of_sale: u32,
    pub duplicate_window_minutes: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            database_url: None,
            database_max_connections: 5,
            point_of_sale: 1,
            duplicate_window_minutes: 10,
        }
    }
}

fn parse<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw.filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

impl AppConfig {
    /// Load `.env` (if present) and read the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let jwt_secret = match lookup("JWT_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None => {
                tracing::warn!("JWT_SECRET not set; using insecure dev default");
                defaults.jwt_secret
            }
        };

        let point_of_sale = parse("POINT_OF_SALE", lookup("POINT_OF_SALE"), defaults.point_of_sale)?;
        if point_of_sale == 0 || point_of_sale > 9_999 {
            return Err(ConfigError::Invalid {
                name: "POINT_OF_SALE",
                reason: "must be between 1 and 9999".to_string(),
            });
        }

        let duplicate_window_minutes = parse(
            "DUPLICATE_WINDOW_MINUTES",
            lookup("DUPLICATE_WINDOW_MINUTES"),
            defaults.duplicate_window_minutes,
        )?;
        if duplicate_window_minutes < 0 {
            return Err(ConfigError::Invalid {
                name: "DUPLICATE_WINDOW_MINUTES",
                reason: "must not be negative".to_string(),
            });
        }

        Ok(Self {
            bind_addr: parse("BIND_ADDR", lookup("BIND_ADDR"), defaults.bind_addr)?,
            jwt_secret,
            database_url: lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()),
            database_max_connections: parse(
                "DATABASE_MAX_CONNECTIONS",
                lookup("DATABASE_MAX_CONNECTIONS"),
                defaults.database_max_connections,
            )?,
            point_of_sale,
            duplicate_window_minutes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("JWT_SECRET", "s3cret"),
            ("DATABASE_URL", "postgres://localhost/pellets"),
            ("POINT_OF_SALE", "4"),
            ("DUPLICATE_WINDOW_MINUTES", "30"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.jwt_secret, "s3cret");
        assert_eq!(cfg.point_of_sale, 4);
        assert_eq!(cfg.duplicate_window_minutes, 30);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/pellets"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            config(&[("POINT_OF_SALE", "0")]),
            Err(ConfigError::Invalid { name: "POINT_OF_SALE", .. })
        ));
        assert!(config(&[("DATABASE_MAX_CONNECTIONS", "many")]).is_err());
    }
}
