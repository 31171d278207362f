//! # Application State
//!
//! Shared state handed to every HTTP handler and WebSocket actor.
//!
//! ## Sharing:
//! - **config**: `Arc<RwLock<AppConfig>>`, shared with the Session Controller so
//!   a runtime update takes effect on the next `connect`
//! - **controller**: cheap to clone; all clones drive the same Session
//! - **video_source**: the live camera the binary hands to `connect`

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::media::{MediaDevices, VideoSource};
use crate::session::SessionController;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    pub controller: SessionController,

    /// Camera handed to every `connect`; owned here, never started or stopped by the core
    pub video_source: Arc<dyn VideoSource>,

    /// When the server started
    pub start_time: Instant,
}

impl AppState {
    /// Build state around a controller that talks to the configured agent.
    pub fn new(config: AppConfig, devices: Arc<dyn MediaDevices>, video_source: Arc<dyn VideoSource>) -> Self {
        let config = Arc::new(RwLock::new(config));
        Self {
            controller: SessionController::new(config.clone(), devices),
            config,
            video_source,
            start_time: Instant::now(),
        }
    }

    /// Build state around an existing controller sharing `config`.
    pub fn with_controller(
        config: Arc<RwLock<AppConfig>>,
        controller: SessionController,
        video_source: Arc<dyn VideoSource>,
    ) -> Self {
        Self {
            config,
            controller,
            video_source,
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration; the lock is released immediately.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Validate and store a new configuration. Applies to the next Session.
    pub fn update_config(&self, new_config: AppConfig) -> AppResult<()> {
        new_config
            .validate()
            .map_err(|e| AppError::ValidationError(e.to_string()))?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
        Ok(())
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
