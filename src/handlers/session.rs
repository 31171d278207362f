//! # Session Control Endpoints
//!
//! Thin HTTP wrappers around the Session Controller.
//!
//! ## Routes:
//! - `GET /api/v1/session`: current state, volume, session id and log
//! - `POST /api/v1/session/connect`: start a Session (409 if one is live)
//! - `POST /api/v1/session/disconnect`: end the Session, always succeeds

use crate::{
    error::AppError,
    session::{ConnectOutcome, ConnectionState},
    state::AppState,
};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    /// Block until the open attempt settles, bounded by `transport.connect_timeout_ms`
    #[serde(default)]
    pub wait: bool,
}

pub async fn get_session(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let controller = &state.controller;

    Ok(HttpResponse::Ok().json(json!({
        "state": controller.connection_state(),
        "volume": controller.volume(),
        "session_id": controller.session_id(),
        "messages": controller.messages()
    })))
}

pub async fn connect_session(
    state: web::Data<AppState>,
    query: web::Query<ConnectQuery>,
) -> Result<HttpResponse, AppError> {
    let controller = &state.controller;

    match controller.connect(state.video_source.clone()).await {
        ConnectOutcome::Started => {}
        ConnectOutcome::Ignored(current) => {
            return Err(AppError::Conflict(format!("A session is already {}", current)));
        }
    }

    if query.wait {
        let timeout = state.get_config().transport.connect_timeout();
        let mut states = controller.subscribe_state();
        let settled = tokio::time::timeout(timeout, states.wait_for(|s| *s != ConnectionState::Connecting))
            .await
            .is_ok();
        if !settled {
            warn!("Connect did not settle within {:?}, giving up", timeout);
            controller.disconnect().await;
            return Err(AppError::Timeout(format!(
                "Agent did not accept the session within {}ms",
                timeout.as_millis()
            )));
        }
    }

    info!("Session connect requested");
    Ok(HttpResponse::Accepted().json(json!({
        "state": controller.connection_state(),
        "session_id": controller.session_id()
    })))
}

pub async fn disconnect_session(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    state.controller.disconnect().await;

    Ok(HttpResponse::Ok().json(json!({
        "state": state.controller.connection_state()
    })))
}
