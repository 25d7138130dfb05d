use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use crate::error::{AppError, Result};
use crate::model::ModelSource;
use crate::session::DEFAULT_CAPACITY;

/// Any checkpoint named here must share this model's architecture.
pub const DEFAULT_MODEL_ID: &str = "Salesforce/blip-image-captioning-large";
// The main branch of the large model only ships pytorch weights.
pub const DEFAULT_MODEL_REVISION: &str = "refs/pr/18";

#[derive(Clone, Debug)]
pub struct Config {
    pub server_addr: SocketAddr,
    pub model_id: String,
    pub model_revision: String,
    pub model_dir: Option<PathBuf>,
    /// Most sessions kept in memory at once.
    pub max_sessions: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        Self::from_vars(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = lookup("PORT").unwrap_or_else(|| "3000".to_string());
        let port = port.parse::<u16>().map_err(|e| AppError::ConfigError(format!("Invalid port: {}", e)))?;
        let ip = IpAddr::from_str(&host).map_err(|e| AppError::ConfigError(format!("Invalid host address: {}", e)))?;

        let server_addr = SocketAddr::new(ip, port);

        let model_id = lookup("CAPTION_MODEL_ID")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string());
        let model_revision = lookup("CAPTION_MODEL_REVISION")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL_REVISION.to_string());
        let model_dir = lookup("CAPTION_MODEL_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let max_sessions = match lookup("MAX_SESSIONS") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| AppError::ConfigError(format!("Invalid session limit: {}", raw)))?,
            None => DEFAULT_CAPACITY,
        };

        Ok(Config {
            server_addr,
            model_id,
            model_revision,
            model_dir,
            max_sessions,
        })
    }

    /// Where the captioning weights should be loaded from.
    pub fn model_source(&self) -> ModelSource {
        match &self.model_dir {
            Some(dir) => ModelSource::Local(dir.clone()),
            None => ModelSource::Hub {
                model_id: self.model_id.clone(),
                revision: self.model_revision.clone(),
            },
        }
    }
}
