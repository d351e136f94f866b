use std::{env, net::SocketAddr};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("{0} is not a valid URL")]
    InvalidUrl(&'static str),

    #[error("BIND_ADDR is not a valid socket address: {0}")]
    InvalidBindAddr(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub github_client_id: String,
    pub github_client_secret: String,
    pub nextauth_secret: String,
    pub base_url: String,
    pub bind_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    /// Empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::MissingVar(key))
        };

        let base_url = lookup("NEXTAUTH_URL")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "http://localhost:3000".to_string());
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl("NEXTAUTH_URL"));
        }

        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:3000".to_string());
        let bind_addr = bind_addr
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidBindAddr(bind_addr))?;

        Ok(Config {
            github_client_id: required("GITHUB_CLIENT_ID")?,
            github_client_secret: required("GITHUB_CLIENT_SECRET")?,
            nextauth_secret: required("NEXTAUTH_SECRET")?,
            base_url,
            bind_addr,
        })
    }

    pub fn uses_https(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}
