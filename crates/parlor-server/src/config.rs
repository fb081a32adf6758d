use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

use parlor_gateway::{BroadcastScope, HubOptions};

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Server settings, read from the environment (and `.env` if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub public_dir: PathBuf,
    pub jwt_secret: String,
    pub owner_emails: Vec<String>,
    pub hub: HubOptions,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = get("PARLOR_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("PARLOR_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("PARLOR_PORT must be a port number")?;
        let db_path = get("PARLOR_DB_PATH").unwrap_or_else(|| "parlor.db".into()).into();
        let public_dir = get("PARLOR_PUBLIC_DIR").unwrap_or_else(|| "./public".into()).into();

        let jwt_secret = match get("PARLOR_JWT_SECRET") {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                warn!("PARLOR_JWT_SECRET is unset, using the development secret");
                DEV_JWT_SECRET.into()
            }
        };

        let owner_emails = get("PARLOR_OWNER_EMAILS")
            .map(|list| {
                list.split(',')
                    .map(|e| e.trim().to_string())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let scope = match get("PARLOR_BROADCAST_SCOPE") {
            Some(value) => value
                .parse::<BroadcastScope>()
                .map_err(anyhow::Error::msg)
                .context("PARLOR_BROADCAST_SCOPE")?,
            None => BroadcastScope::default(),
        };
        let acknowledge_failures = get("PARLOR_ACK_ERRORS")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        Ok(Self {
            host,
            port,
            db_path,
            public_dir,
            jwt_secret,
            owner_emails,
            hub: HubOptions {
                scope,
                acknowledge_failures,
            },
        })
    }
}
