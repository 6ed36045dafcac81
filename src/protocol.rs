//! Live API wire messages.

use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;

/// MIME type of captured microphone audio.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

// ==================== client → server ====================

#[derive(Serialize, Debug, Clone)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    pub speech_config: SpeechConfig,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Serialize, Debug, Clone)]
pub struct TextPart {
    pub text: String,
}

impl SetupMessage {
    /// Session-open payload for a tutor speaking `config`'s language with its voice.
    pub fn for_session(model: &str, config: &SessionConfig) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec![Modality::Audio],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: config.language.voice.clone(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![TextPart { text: config.system_instruction() }],
                },
            },
        }
    }
}

/// One outbound `{media}` frame.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaBlob>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

impl RealtimeInputMessage {
    pub fn audio(wire_blob: String) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaBlob {
                    mime_type: INPUT_MIME_TYPE.to_string(),
                    data: wire_blob,
                }],
            },
        }
    }
}

// ==================== server → client ====================

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub inline_data: Option<InlineData>,
    pub text: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: Option<String>,
    pub data: String,
}

impl InlineData {
    /// Rate advertised in a `audio/pcm;rate=N` MIME type.
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .as_deref()?
            .split(';')
            .find_map(|param| param.trim().strip_prefix("rate="))
            .and_then(|rate| rate.trim().parse().ok())
    }
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Every inline audio part, in message order.
    pub fn audio_parts(&self) -> impl Iterator<Item = &InlineData> {
        self.server_content
            .iter()
            .filter_map(|c| c.model_turn.as_ref())
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
    }

    /// Text parts the model sent alongside its audio.
    pub fn text_parts(&self) -> impl Iterator<Item = &str> {
        self.server_content
            .iter()
            .filter_map(|c| c.model_turn.as_ref())
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.text.as_deref())
    }

    pub fn is_interrupted(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.interrupted)
    }

    pub fn is_turn_complete(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.turn_complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Language, ProficiencyLevel};
    use serde_json::json;

    #[test]
    fn setup_payload_matches_the_service_schema() {
        let config = SessionConfig {
            language: Language::find("de").unwrap(),
            level: ProficiencyLevel::Intermediate,
        };
        let value = serde_json::to_value(SetupMessage::for_session("some-model", &config)).unwrap();

        assert_eq!(value["setup"]["model"], "models/some-model");
        assert_eq!(value["setup"]["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            value["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Fenrir"
        );
        let text = value["setup"]["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
        assert!(text.contains("German"));
        assert!(text.contains("Intermediate"));
    }

    #[test]
    fn realtime_input_carries_pcm_mime_type() {
        let value = serde_json::to_value(RealtimeInputMessage::audio("AAAA".into())).unwrap();
        assert_eq!(
            value,
            json!({"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "AAAA"}]}})
        );
    }

    #[test]
    fn audio_and_interruption_are_extracted() {
        let msg: ServerMessage = serde_json::from_value(json!({
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQI="}},
                    {"text": "hola"},
                    {"inlineData": {"data": "AwQ="}}
                ]}
            }
        }))
        .unwrap();
        let parts: Vec<&InlineData> = msg.audio_parts().collect();
        assert_eq!(parts.iter().map(|p| p.data.as_str()).collect::<Vec<_>>(), vec!["AQI=", "AwQ="]);
        assert_eq!(parts[0].sample_rate(), Some(24000));
        assert_eq!(parts[1].sample_rate(), None);
        assert_eq!(msg.text_parts().collect::<Vec<_>>(), vec!["hola"]);
        assert!(!msg.is_interrupted());

        let msg: ServerMessage =
            serde_json::from_value(json!({"serverContent": {"interrupted": true}})).unwrap();
        assert!(msg.is_interrupted());
        assert_eq!(msg.audio_parts().count(), 0);
    }

    #[test]
    fn setup_complete_and_unknown_fields() {
        let msg: ServerMessage =
            serde_json::from_value(json!({"setupComplete": {}, "usageMetadata": {"x": 1}})).unwrap();
        assert!(msg.is_setup_complete());
        assert!(!msg.is_turn_complete());
    }
}
