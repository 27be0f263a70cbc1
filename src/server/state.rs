use crate::{config::ServerConfig, remover::BackgroundRemover};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// State shared by every request handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub remover: Arc<BackgroundRemover>,
    pub started_at: DateTime<Utc>,
    /// Multipart field that carries the image
    pub upload_field: Arc<str>,
}

impl AppState {
    #[must_use]
    pub fn new(remover: BackgroundRemover, config: &ServerConfig) -> Self {
        Self {
            remover: Arc::new(remover),
            started_at: Utc::now(),
            upload_field: Arc::from(config.upload_field.as_str()),
        }
    }
}
