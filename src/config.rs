//! Runtime configuration.
//!
//! Tunables live in an optional toml file; secrets come from the environment
//! (a `.env` file is honored). Missing `[supabase]` credentials disable
//! simulation persistence, a missing `OPENROUTER_API_KEY` pins agents to
//! `hold` — both are degraded modes, not errors.

use crate::error::{DeskError, Result};
use serde::Deserialize;
use std::env;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub supabase: Option<SupabaseConfig>,
    #[serde(default)]
    pub openrouter: Option<OpenRouterConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Poll-loop tick interval.
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    /// Per-request deadline for venue adapters.
    #[serde(default = "default_venue_timeout")]
    pub venue_timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            venue_timeout_secs: default_venue_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseConfig {
    pub url: String,
    /// Grants writes; without it the store is read-only at best.
    #[serde(default)]
    pub service_role_key: Option<String>,
    /// Read-only fallback key.
    #[serde(default)]
    pub anon_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenRouterConfig {
    pub api_key: String,
    #[serde(default = "default_openrouter_url")]
    pub base_url: String,
}

fn default_port() -> u16 {
    3001
}

fn default_poll_interval() -> u64 {
    30
}

fn default_venue_timeout() -> u64 {
    30
}

fn default_openrouter_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

impl Config {
    /// Load from a toml file (if present) and apply environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = if Path::new(path).exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| DeskError::Config(format!("read {path}: {e}")))?;
            toml::from_str(&raw).map_err(|e| DeskError::Config(format!("parse {path}: {e}")))?
        } else {
            Config::default()
        };

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(port) = env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Ok(url) = env::var("SUPABASE_URL") {
            let supabase = self.supabase.get_or_insert(SupabaseConfig {
                url: url.clone(),
                service_role_key: None,
                anon_key: None,
            });
            supabase.url = url;
        }
        if let Some(supabase) = self.supabase.as_mut() {
            if let Ok(key) = env::var("SUPABASE_SERVICE_ROLE_KEY") {
                supabase.service_role_key = Some(key);
            }
            if let Ok(key) = env::var("SUPABASE_ANON_KEY") {
                supabase.anon_key = Some(key);
            }
        }

        if let Ok(key) = env::var("OPENROUTER_API_KEY") {
            match self.openrouter.as_mut() {
                Some(or) => or.api_key = key,
                None => {
                    self.openrouter = Some(OpenRouterConfig {
                        api_key: key,
                        base_url: default_openrouter_url(),
                    })
                }
            }
        }
    }
}
