use std::{
    env,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, Result};

use crate::chat::{DEFAULT_API_BASE, DEFAULT_MODEL};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub data_dir: PathBuf,
    pub chat: ChatConfig,
    pub session_secure: bool,
}

#[derive(Clone)]
pub struct ChatConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub timeout: Duration,
}

// keeps the key out of logs
impl std::fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let host = parsed("HOST", "0.0.0.0")?;
        let port = parsed("PORT", "8081")?;
        let database_url = non_empty("DATABASE_URL");
        let database_max_connections = parsed("DATABASE_MAX_CONNECTIONS", "10")?;
        let data_dir = PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "./data".into()));

        let chat = ChatConfig {
            api_key: non_empty("CHAT_API_KEY"),
            api_base: env::var("CHAT_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.into()),
            model: env::var("CHAT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into()),
            timeout: Duration::from_secs(parsed("CHAT_TIMEOUT_SECS", "30")?),
        };

        let session_secure = parsed("SESSION_SECURE", "false")?;

        Ok(Self {
            host,
            port,
            database_url,
            database_max_connections,
            data_dir,
            chat,
            session_secure,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<T>()
        .with_context(|| format!("Failed to parse {key}"))
}
