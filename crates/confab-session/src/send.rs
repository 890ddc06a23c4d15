//! Send pipeline: frame construction.
//!
//! All outbound frames are built here and serialized through the
//! transport's single-writer contract. Only populated generation fields
//! make it onto the wire; when a response schema is present the MIME type
//! is forced to the JSON identifier.

use serde_json::{Value, json};

use confab_core::{
    ClientConfig, ClientContent, ClientFrame, FunctionResponse, JSON_MIME_TYPE, Modality,
    SetupFrame,
};

/// Build the setup frame for `config`.
#[must_use]
pub fn build_setup(config: &ClientConfig) -> ClientFrame {
    let mut generation = config.generation.clone();
    if generation.response_schema.is_some() {
        generation.response_mime_type = Some(JSON_MIME_TYPE.to_string());
    }

    let mut response_modalities = vec![Modality::Text];
    if config.enable_audio {
        response_modalities.push(Modality::Audio);
    }

    ClientFrame::Setup(SetupFrame {
        model: config.normalized_model().to_string(),
        system_instruction: config.system_prompt.clone(),
        tools: config.tools.clone(),
        generation,
        response_modalities,
        voice: config.voice.clone(),
        enable_web_search: config.enable_web_search,
        enable_code_execution: config.enable_code_execution,
    })
}

/// Build a user text frame that completes the client's turn.
#[must_use]
pub fn build_user_text(text: &str) -> ClientFrame {
    ClientFrame::Content(ClientContent::user_text(text))
}

/// Build one frame carrying every pending function response.
#[must_use]
pub fn build_tool_responses(responses: Vec<FunctionResponse>) -> ClientFrame {
    ClientFrame::ToolResponse(responses)
}

/// Error payload for a failed or unknown tool.
#[must_use]
pub fn tool_error_payload(message: &str) -> Value {
    json!({ "error": message })
}

/// Explicit rejection sentinel sent when the user declines a tool call.
#[must_use]
pub fn tool_rejection_payload(reason: &str) -> Value {
    json!({ "error": "rejected by user", "rejected": true, "reason": reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_core::{GenerationConfig, ToolDefinition};
    use serde_json::json;

    #[test]
    fn text_only_config_requests_text_modality() {
        let config = ClientConfig::for_model("gemini-1.5-flash");
        let ClientFrame::Setup(setup) = build_setup(&config) else {
            panic!("expected setup frame");
        };
        assert_eq!(setup.response_modalities, vec![Modality::Text]);
        assert!(setup.voice.is_none());
    }

    #[test]
    fn audio_config_adds_audio_modality_and_voice() {
        let config = ClientConfig {
            enable_audio: true,
            voice: Some("Aoede".into()),
            ..ClientConfig::for_model("gemini-2.0-flash-live-001")
        };
        let ClientFrame::Setup(setup) = build_setup(&config) else {
            panic!("expected setup frame");
        };
        assert_eq!(
            setup.response_modalities,
            vec![Modality::Text, Modality::Audio]
        );
        assert_eq!(setup.voice.as_deref(), Some("Aoede"));
    }

    #[test]
    fn response_schema_forces_json_mime_type() {
        let config = ClientConfig {
            generation: GenerationConfig {
                response_mime_type: Some("text/plain".into()),
                response_schema: Some(json!({"type": "object"})),
                ..GenerationConfig::default()
            },
            ..ClientConfig::for_model("m")
        };
        let ClientFrame::Setup(setup) = build_setup(&config) else {
            panic!("expected setup frame");
        };
        assert_eq!(
            setup.generation.response_mime_type.as_deref(),
            Some(JSON_MIME_TYPE)
        );
    }

    #[test]
    fn setup_strips_models_prefix() {
        let config = ClientConfig::for_model("models/gemini-1.5-flash");
        let ClientFrame::Setup(setup) = build_setup(&config) else {
            panic!("expected setup frame");
        };
        assert_eq!(setup.model, "gemini-1.5-flash");
    }

    #[test]
    fn setup_carries_tool_declarations() {
        let config = ClientConfig {
            tools: vec![ToolDefinition {
                name: "getTime".into(),
                description: "clock".into(),
                parameters: None,
            }],
            ..ClientConfig::for_model("m")
        };
        let ClientFrame::Setup(setup) = build_setup(&config) else {
            panic!("expected setup frame");
        };
        assert_eq!(setup.tools.len(), 1);
    }

    #[test]
    fn user_text_marks_turn_complete() {
        let ClientFrame::Content(content) = build_user_text("hello") else {
            panic!("expected content frame");
        };
        assert!(content.turn_complete);
    }

    #[test]
    fn rejection_payload_is_a_sentinel() {
        let payload = tool_rejection_payload("not now");
        assert_eq!(payload["rejected"], json!(true));
        assert_eq!(payload["reason"], json!("not now"));
    }
}
