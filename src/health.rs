use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let controller = &state.controller;
    let metrics = controller.metrics();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "session": {
            "state": controller.connection_state(),
            "session_id": controller.session_id(),
            "volume": controller.volume()
        },
        "agent": {
            "endpoint": config.agent.endpoint,
            "model": config.agent.model,
            "api_key_configured": !config.agent.api_key.is_empty()
        },
        "sessions": {
            "started": metrics.sessions_started,
            "failed": metrics.sessions_failed
        },
        "memory": get_memory_info()
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.controller.metrics();
    let uptime_seconds = state.get_uptime_seconds();
    let config = state.get_config();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "pipelines": metrics,
        "rates": {
            "frame_skip_ratio": if metrics.frames_sent + metrics.frames_skipped > 0 {
                metrics.frames_skipped as f64 / (metrics.frames_sent + metrics.frames_skipped) as f64
            } else {
                0.0
            },
            "session_failure_ratio": if metrics.sessions_started + metrics.sessions_failed > 0 {
                metrics.sessions_failed as f64 / (metrics.sessions_started + metrics.sessions_failed) as f64
            } else {
                0.0
            }
        },
        "profile": {
            "wire_sample_rate": config.audio.wire_sample_rate,
            "chunk_duration_ms": config.audio.chunk_duration_ms,
            "frame_interval_ms": config.video.frame_interval_ms,
            "jpeg_quality": config.video.jpeg_quality
        },
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", std::process::id())) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                let kilobytes = || {
                    line.split_whitespace()
                        .nth(1)
                        .and_then(|kb| kb.parse::<u64>().ok())
                        .unwrap_or(0)
                };
                if line.starts_with("VmRSS:") {
                    vm_rss = kilobytes() * 1024;
                } else if line.starts_with("VmSize:") {
                    vm_size = kilobytes() * 1024;
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}
