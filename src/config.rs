//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - Built-in defaults (the fixed media profile)
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix, `__` between sections)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST`, `PORT` and `GEMINI_API_KEY` environment variables
//! 2. `APP_*` environment variables (e.g. `APP_VIDEO__FRAME_INTERVAL_MS=500`)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! A configuration change never touches a live session; the next `connect`
//! picks it up.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub audio: AudioConfig,
    pub video: VideoConfig,
    pub transport: TransportConfig,
    pub media: MediaConfig,
}

/// Where the HTTP control surface listens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Remote agent endpoint and session setup.
///
/// ## Fields:
/// - `endpoint`: WebSocket URL of the agent's bidirectional streaming API
/// - `api_key`: appended as the `key` query parameter; never logged
/// - `model`: model resource name sent in the setup message
/// - `voice`: prebuilt voice used for synthesized audio
/// - `system_instruction`: optional persona / instruction text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: Option<String>,
}

/// Outbound and inbound audio profile.
///
/// ## Latency trade-off:
/// `chunk_duration_ms` bounds how long captured audio waits before it is sent.
/// 100ms keeps the perceived lag well under a second while amortizing the
/// per-message overhead of base64 + JSON framing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    /// Outbound wire sample rate (mono PCM16)
    pub wire_sample_rate: u32,
    /// Duration of one outbound chunk
    pub chunk_duration_ms: u32,
    /// Sample rate the playback device is driven at
    pub output_sample_rate: u32,
    /// RMS window of the volume meter
    pub meter_window_ms: u32,
    /// Consecutive capture faults tolerated before the session fails
    pub max_consecutive_faults: u32,
}

/// Camera frame sampling profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoConfig {
    pub frame_interval_ms: u64,
    pub jpeg_quality: u8,
    pub max_width: u32,
    pub max_height: u32,
}

/// Queue sizes and timing bounds for the agent channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    /// Bounded outbound queue between producers and the socket writer
    pub outbound_capacity: usize,
    /// Bounded inbound queue between the socket reader and playback
    pub inbound_capacity: usize,
    /// Upper bound on the best-effort flush during close
    pub close_timeout_ms: u64,
    /// Caller-side bound the HTTP surface waits for a connect to settle
    pub connect_timeout_ms: u64,
}

/// Demo device wiring used by the binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    /// WAV file played as the microphone; silence when unset
    pub input_wav: Option<String>,
    /// WAV file receiving synthesized audio; discarded when unset
    pub output_wav: Option<String>,
    /// Restart the input file when it ends
    pub loop_input: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            agent: AgentConfig {
                endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
                api_key: String::new(),
                model: "models/gemini-2.0-flash-exp".to_string(),
                voice: "Puck".to_string(),
                system_instruction: None,
            },
            audio: AudioConfig {
                wire_sample_rate: 16000,
                chunk_duration_ms: 100,
                output_sample_rate: 24000,
                meter_window_ms: 50,
                max_consecutive_faults: 3,
            },
            video: VideoConfig {
                frame_interval_ms: 1000,
                jpeg_quality: 60,
                max_width: 640,
                max_height: 480,
            },
            transport: TransportConfig {
                outbound_capacity: 64,
                inbound_capacity: 256,
                close_timeout_ms: 500,
                connect_timeout_ms: 10_000,
            },
            media: MediaConfig {
                input_wav: None,
                output_wav: None,
                loop_input: true,
            },
        }
    }
}

impl AudioConfig {
    /// Number of wire samples in one chunk (1600 for 100ms at 16kHz).
    pub fn chunk_samples(&self) -> usize {
        (self.wire_sample_rate as usize * self.chunk_duration_ms as usize) / 1000
    }
}

impl VideoConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl TransportConfig {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_AUDIO__CHUNK_DURATION_MS=200`: Longer chunks
    /// - `GEMINI_API_KEY=...`: API key for the remote agent
    /// - `HOST=0.0.0.0` / `PORT=3000`: Deployment platform conventions
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("GEMINI_API_KEY") {
            settings = settings.set_override("agent.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Chunk duration stays in the 100–250ms interactive range
    /// - Frame interval stays in the 0.5–2s range
    /// - JPEG quality is 1–100
    /// - Sample rates, queue capacities and the fault limit are non-zero
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.agent.endpoint.is_empty() {
            return Err(anyhow::anyhow!("Agent endpoint cannot be empty"));
        }

        if !(100..=250).contains(&self.audio.chunk_duration_ms) {
            return Err(anyhow::anyhow!(
                "Audio chunk duration must be between 100 and 250ms, got {}",
                self.audio.chunk_duration_ms
            ));
        }

        if self.audio.wire_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rates must be greater than 0"));
        }

        if self.audio.meter_window_ms == 0 {
            return Err(anyhow::anyhow!("Meter window must be greater than 0"));
        }

        if self.audio.max_consecutive_faults == 0 {
            return Err(anyhow::anyhow!("Max consecutive faults must be greater than 0"));
        }

        if !(500..=2000).contains(&self.video.frame_interval_ms) {
            return Err(anyhow::anyhow!(
                "Frame interval must be between 500 and 2000ms, got {}",
                self.video.frame_interval_ms
            ));
        }

        if self.video.jpeg_quality == 0 || self.video.jpeg_quality > 100 {
            return Err(anyhow::anyhow!("JPEG quality must be between 1 and 100"));
        }

        if self.video.max_width == 0 || self.video.max_height == 0 {
            return Err(anyhow::anyhow!("Maximum frame size must be non-zero"));
        }

        if self.transport.outbound_capacity == 0 || self.transport.inbound_capacity == 0 {
            return Err(anyhow::anyhow!("Transport queue capacities must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are changed, e.g.
    /// `{"video": {"frame_interval_ms": 500}}` changes only the frame period.
    /// The server section is fixed at startup and ignored here.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(agent) = partial.get("agent") {
            if let Some(model) = agent.get("model").and_then(|v| v.as_str()) {
                self.agent.model = model.to_string();
            }
            if let Some(voice) = agent.get("voice").and_then(|v| v.as_str()) {
                self.agent.voice = voice.to_string();
            }
            if let Some(instruction) = agent.get("system_instruction") {
                self.agent.system_instruction = instruction.as_str().map(str::to_string);
            }
        }

        if let Some(audio) = partial.get("audio") {
            if let Some(ms) = audio.get("chunk_duration_ms").and_then(|v| v.as_u64()) {
                self.audio.chunk_duration_ms = ms as u32;
            }
            if let Some(ms) = audio.get("meter_window_ms").and_then(|v| v.as_u64()) {
                self.audio.meter_window_ms = ms as u32;
            }
            if let Some(limit) = audio.get("max_consecutive_faults").and_then(|v| v.as_u64()) {
                self.audio.max_consecutive_faults = limit as u32;
            }
        }

        if let Some(video) = partial.get("video") {
            if let Some(ms) = video.get("frame_interval_ms").and_then(|v| v.as_u64()) {
                self.video.frame_interval_ms = ms;
            }
            if let Some(quality) = video.get("jpeg_quality").and_then(|v| v.as_u64()) {
                self.video.jpeg_quality = quality.min(u8::MAX as u64) as u8;
            }
        }

        if let Some(transport) = partial.get("transport") {
            if let Some(ms) = transport.get("close_timeout_ms").and_then(|v| v.as_u64()) {
                self.transport.close_timeout_ms = ms;
            }
        }

        self.validate()?;
        Ok(())
    }

    /// Render the configuration as TOML with the API key blanked out.
    pub fn to_redacted_toml(&self) -> Result<String> {
        let mut redacted = self.clone();
        if !redacted.agent.api_key.is_empty() {
            redacted.agent.api_key = "********".to_string();
        }
        Ok(toml::to_string_pretty(&redacted)?)
    }
}
