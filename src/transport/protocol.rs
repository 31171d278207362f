//! # Agent Wire Protocol
//!
//! JSON messages exchanged with the remote agent over the WebSocket.
//!
//! ## Client → Agent:
//! - **setup**: first message; selects model, voice and response modality
//! - **realtimeInput**: one media chunk, either `audio/pcm;rate=16000` or
//!   `image/jpeg`, base64 encoded
//!
//! ## Agent → Client:
//! - **setupComplete**: handshake accepted
//! - **serverContent**: model turn parts (inline audio, text), plus
//!   `turnComplete` / `interrupted` flags
//! - **goAway**: the agent is about to close the channel
//!
//! Message boundaries are preserved by the WebSocket framing, so every decode
//! call sees one whole message.

use crate::audio::processor::decode_pcm16_le;
use crate::audio::AudioChunk;
use crate::config::AgentConfig;
use crate::error::SessionError;
use crate::video::VideoSnapshot;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Messages the session sends to the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Audio(AudioChunk),
    Video(VideoSnapshot),
}

/// Control signals the agent sends alongside audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignal {
    /// The model finished its response turn
    TurnComplete,
    /// The user barged in; queued audio for the current turn is stale
    Interrupted,
    /// The agent will close the channel soon
    GoAway,
}

/// One decoded unit of an agent message, in message order.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    SetupComplete,
    Audio { sample_rate: u32, samples: Vec<f32> },
    Text(String),
    Control(ControlSignal),
}

/// Payload of an inbound segment handed to playback.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentPayload {
    Audio { sample_rate: u32, samples: Vec<f32> },
    Control(ControlSignal),
}

/// A unit of synthesized audio (or a control marker) tagged with its arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundSegment {
    pub sequence: u64,
    pub payload: SegmentPayload,
}

// ---- outbound wire structs ----

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupEnvelope<'a> {
    setup: Setup<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: &'a str,
    generation_config: GenerationConfig<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'a str; 1],
    speech_config: SpeechConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig<'a> {
    voice_name: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputEnvelope {
    realtime_input: RealtimeInput,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<MediaChunk>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunk {
    mime_type: String,
    data: String,
}

// ---- inbound wire structs ----

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<serde_json::Value>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
    output_transcription: Option<Transcription>,
}

#[derive(Deserialize, Default)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct Transcription {
    text: Option<String>,
}

/// Build the setup message that opens every session.
pub fn encode_setup(agent: &AgentConfig) -> Result<String, SessionError> {
    let envelope = SetupEnvelope {
        setup: Setup {
            model: &agent.model,
            generation_config: GenerationConfig {
                response_modalities: ["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: &agent.voice,
                        },
                    },
                },
            },
            system_instruction: agent.system_instruction.as_deref().map(|text| Content {
                parts: vec![TextPart { text }],
            }),
        },
    };
    serde_json::to_string(&envelope)
        .map_err(|e| SessionError::Encoding(format!("setup message: {}", e)))
}

/// Serialize one outbound media message.
pub fn encode_outbound(message: &OutboundMessage) -> Result<String, SessionError> {
    let chunk = match message {
        OutboundMessage::Audio(chunk) => MediaChunk {
            mime_type: format!("audio/pcm;rate={}", chunk.sample_rate),
            data: BASE64.encode(chunk.to_pcm_bytes()),
        },
        OutboundMessage::Video(snapshot) => MediaChunk {
            mime_type: "image/jpeg".to_string(),
            data: BASE64.encode(&snapshot.jpeg),
        },
    };
    let envelope = RealtimeInputEnvelope {
        realtime_input: RealtimeInput {
            media_chunks: vec![chunk],
        },
    };
    serde_json::to_string(&envelope)
        .map_err(|e| SessionError::Encoding(format!("realtime input: {}", e)))
}

/// Decode one agent message into events, preserving in-message order.
///
/// ## Errors:
/// Malformed JSON or payloads yield `SessionError::Encoding`; the caller drops
/// that one message and keeps the channel open.
pub fn decode_server_message(
    text: &str,
    default_sample_rate: u32,
) -> Result<Vec<InboundEvent>, SessionError> {
    let message: ServerMessage = serde_json::from_str(text)
        .map_err(|e| SessionError::Encoding(format!("agent message is not valid JSON: {}", e)))?;

    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(InboundEvent::SetupComplete);
    }

    if let Some(content) = message.server_content {
        if content.interrupted {
            events.push(InboundEvent::Control(ControlSignal::Interrupted));
        }

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    if !inline.mime_type.starts_with("audio/pcm") {
                        tracing::debug!("Ignoring inline {} part", inline.mime_type);
                        continue;
                    }
                    let bytes = BASE64.decode(inline.data.as_bytes()).map_err(|e| {
                        SessionError::Encoding(format!("inline audio is not base64: {}", e))
                    })?;
                    events.push(InboundEvent::Audio {
                        sample_rate: parse_rate(&inline.mime_type).unwrap_or(default_sample_rate),
                        samples: decode_pcm16_le(&bytes)?,
                    });
                }
                if let Some(text) = part.text {
                    events.push(InboundEvent::Text(text));
                }
            }
        }

        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            events.push(InboundEvent::Text(text));
        }

        if content.turn_complete {
            events.push(InboundEvent::Control(ControlSignal::TurnComplete));
        }
    }

    if message.go_away.is_some() {
        events.push(InboundEvent::Control(ControlSignal::GoAway));
    }

    Ok(events)
}

/// Extract `rate=N` from a mime type such as `audio/pcm;rate=24000`.
fn parse_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use chrono::Utc;

    #[test]
    fn test_setup_message_shape() {
        let mut agent = AppConfig::default().agent;
        agent.system_instruction = Some("Be brief.".to_string());
        let json: serde_json::Value = serde_json::from_str(&encode_setup(&agent).unwrap()).unwrap();

        assert_eq!(json["setup"]["model"], agent.model.as_str());
        assert_eq!(json["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
        assert_eq!(json["setup"]["systemInstruction"]["parts"][0]["text"], "Be brief.");
    }

    #[test]
    fn test_setup_without_instruction_omits_field() {
        let agent = AppConfig::default().agent;
        let json: serde_json::Value = serde_json::from_str(&encode_setup(&agent).unwrap()).unwrap();
        assert!(json["setup"].get("systemInstruction").is_none());
    }

    #[test]
    fn test_audio_chunk_encoding() {
        let chunk = AudioChunk {
            sequence: 1,
            sample_rate: 16000,
            samples: vec![1, -2],
        };
        let json: serde_json::Value =
            serde_json::from_str(&encode_outbound(&OutboundMessage::Audio(chunk)).unwrap()).unwrap();
        let media = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(media["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(media["data"], BASE64.encode([0x01, 0x00, 0xFE, 0xFF]));
    }

    #[test]
    fn test_video_snapshot_encoding() {
        let snapshot = VideoSnapshot {
            sequence: 3,
            jpeg: vec![0xFF, 0xD8, 0xFF],
            width: 2,
            height: 2,
            captured_at: Utc::now(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&encode_outbound(&OutboundMessage::Video(snapshot)).unwrap()).unwrap();
        assert_eq!(json["realtimeInput"]["mediaChunks"][0]["mimeType"], "image/jpeg");
    }

    #[test]
    fn test_decode_model_turn_with_audio_and_turn_complete() {
        let audio = BASE64.encode([0x00, 0x40, 0x00, 0xC0]);
        let text = format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{}"}}}},{{"text":"hello"}}]}},"turnComplete":true}}}}"#,
            audio
        );
        let events = decode_server_message(&text, 24000).unwrap();
        assert_eq!(
            events,
            vec![
                InboundEvent::Audio {
                    sample_rate: 24000,
                    samples: vec![0.5, -0.5]
                },
                InboundEvent::Text("hello".to_string()),
                InboundEvent::Control(ControlSignal::TurnComplete),
            ]
        );
    }

    #[test]
    fn test_decode_setup_complete_and_go_away() {
        assert_eq!(
            decode_server_message(r#"{"setupComplete":{}}"#, 24000).unwrap(),
            vec![InboundEvent::SetupComplete]
        );
        assert_eq!(
            decode_server_message(r#"{"goAway":{"timeLeft":"10s"}}"#, 24000).unwrap(),
            vec![InboundEvent::Control(ControlSignal::GoAway)]
        );
    }

    #[test]
    fn test_decode_interrupted() {
        let events = decode_server_message(r#"{"serverContent":{"interrupted":true}}"#, 24000).unwrap();
        assert_eq!(events, vec![InboundEvent::Control(ControlSignal::Interrupted)]);
    }

    #[test]
    fn test_missing_rate_uses_default() {
        let audio = BASE64.encode([0x00, 0x00]);
        let text = format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm","data":"{}"}}}}]}}}}}}"#,
            audio
        );
        let events = decode_server_message(&text, 22050).unwrap();
        assert!(matches!(events[0], InboundEvent::Audio { sample_rate: 22050, .. }));
    }

    #[test]
    fn test_malformed_message_is_encoding_fault() {
        assert!(matches!(
            decode_server_message("not json", 24000),
            Err(SessionError::Encoding(_))
        ));
        let bad_audio = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm","data":"%%%"}}]}}}"#;
        assert!(matches!(
            decode_server_message(bad_audio, 24000),
            Err(SessionError::Encoding(_))
        ));
    }

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("audio/pcm;rate=24000"), Some(24000));
        assert_eq!(parse_rate("audio/pcm; rate=16000"), Some(16000));
        assert_eq!(parse_rate("audio/pcm"), None);
    }
}
