//! TOML configuration parsing and validation.
//!
//! ```toml
//! [db]
//! path = "./data/khub.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:3080"
//!
//! [auth]
//! jwt_secret = "change-me"
//! token_ttl_secs = 86400
//!
//! [knowledge_bases]
//! preview_limit = 5
//!
//! [pagination]
//! default_limit = 25
//! max_limit = 100
//!
//! [logging]
//! filter = "info"
//! ```
//!
//! Only `[db]` is required. `KHUB_JWT_SECRET` overrides `auth.jwt_secret`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const JWT_SECRET_ENV: &str = "KHUB_JWT_SECRET";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub knowledge_bases: KnowledgeBasesConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_secs: default_token_ttl(),
        }
    }
}

fn default_token_ttl() -> u64 {
    24 * 60 * 60
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeBasesConfig {
    /// Member conversations shown inline per knowledge base in `GET /`.
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
}

impl Default for KnowledgeBasesConfig {
    fn default() -> Self {
        Self {
            preview_limit: default_preview_limit(),
        }
    }
}

fn default_preview_limit() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaginationConfig {
    #[serde(default = "default_page_limit")]
    pub default_limit: i64,
    #[serde(default = "default_max_limit")]
    pub max_limit: i64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: default_page_limit(),
            max_limit: default_max_limit(),
        }
    }
}

fn default_page_limit() -> i64 {
    knowledge_hub_core::pagination::DEFAULT_PAGE_LIMIT
}
fn default_max_limit() -> i64 {
    knowledge_hub_core::pagination::MAX_PAGE_LIMIT
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    /// A config pointing at `db_path` with every other section defaulted.
    pub fn for_database(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            knowledge_bases: KnowledgeBasesConfig::default(),
            pagination: PaginationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// The signing secret, failing when none is configured.
    pub fn jwt_secret(&self) -> Result<&str> {
        if self.auth.jwt_secret.is_empty() {
            anyhow::bail!(
                "auth.jwt_secret is not set (configure it or export {})",
                JWT_SECRET_ENV
            );
        }
        Ok(&self.auth.jwt_secret)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if let Ok(secret) = std::env::var(JWT_SECRET_ENV) {
        if !secret.is_empty() {
            config.auth.jwt_secret = secret;
        }
    }

    if config.pagination.default_limit < 1 {
        anyhow::bail!("pagination.default_limit must be >= 1");
    }
    if config.pagination.max_limit < config.pagination.default_limit {
        anyhow::bail!("pagination.max_limit must be >= pagination.default_limit");
    }
    if config.auth.token_ttl_secs == 0 {
        anyhow::bail!("auth.token_ttl_secs must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse_config("[db]\npath = \"/tmp/khub.sqlite\"\n").unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:3080");
        assert_eq!(cfg.knowledge_bases.preview_limit, 5);
        assert_eq!(cfg.pagination.default_limit, 25);
        assert_eq!(cfg.pagination.max_limit, 100);
        assert_eq!(cfg.logging.filter, "info");
    }

    #[test]
    fn test_invalid_pagination_rejected() {
        let err = parse_config(
            "[db]\npath = \"x\"\n[pagination]\ndefault_limit = 50\nmax_limit = 10\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_limit"));
    }

    #[test]
    fn test_missing_db_section_fails() {
        assert!(parse_config("[server]\nbind = \"0.0.0.0:1\"\n").is_err());
    }

    #[test]
    fn test_empty_secret_is_an_error() {
        let mut cfg = Config::for_database("x.sqlite");
        assert!(cfg.jwt_secret().is_err());
        cfg.auth.jwt_secret = "s3cret".to_string();
        assert_eq!(cfg.jwt_secret().unwrap(), "s3cret");
    }
}
