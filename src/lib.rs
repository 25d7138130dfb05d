pub mod api;
pub mod captioner;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod scraper;
pub mod session;

use std::sync::Arc;
use config::Config;
use model::CaptionModel;
use session::SessionStore;

/// Application state that will be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub model: Arc<dyn CaptionModel>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(config: Config, model: Arc<dyn CaptionModel>) -> Self {
        let sessions = Arc::new(SessionStore::new(config.max_sessions));
        Self {
            config: Arc::new(config),
            model,
            sessions,
        }
    }
}
