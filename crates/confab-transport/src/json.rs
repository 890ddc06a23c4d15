//! JSON envelope codec for the WebSocket transport.
//!
//! Outbound frames serialize to the `setup` / `clientContent` /
//! `toolResponse` envelopes; inbound messages are walked field-by-field
//! into transport-neutral [`ServerFrame`]s. One inbound envelope can carry
//! several frames (e.g. `serverContent` plus `usageMetadata`), so decoding
//! returns a list.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use confab_core::{
    ClientError, ClientFrame, CodeExecutionResult, ExecutableCode, FunctionCall, GroundingMetadata,
    GroundingSource, Modality, Part, SafetyRating, ServerContent, ServerFrame, SetupFrame,
    WireUsage,
};

// ── Outbound envelopes ─────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupEnvelope {
    setup: SetupPayload,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupPayload {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfigJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ContentJson>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfigJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<Value>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentJson {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<PartJson>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct PartJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<BlobJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCallJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    executable_code: Option<ExecutableCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_execution_result: Option<CodeExecutionResult>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobJson {
    mime_type: String,
    /// Base64-encoded bytes.
    data: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FunctionCallJson {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContentEnvelope {
    client_content: ClientContentJson,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContentJson {
    turns: Vec<ContentJson>,
    turn_complete: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolResponseEnvelope {
    tool_response: ToolResponseJson,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolResponseJson {
    function_responses: Vec<FunctionResponseJson>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FunctionResponseJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    response: Value,
}

// ── Encoding ───────────────────────────────────────────────────────

fn part_to_json(part: &Part) -> PartJson {
    match part {
        Part::Text(text) => PartJson {
            text: Some(text.clone()),
            ..PartJson::default()
        },
        Part::InlineData { mime_type, data } => PartJson {
            inline_data: Some(BlobJson {
                mime_type: mime_type.clone(),
                data: BASE64.encode(data),
            }),
            ..PartJson::default()
        },
        Part::FunctionCall(call) => PartJson {
            function_call: Some(FunctionCallJson {
                id: call.id.clone(),
                name: call.name.clone(),
                args: call.args.clone(),
            }),
            ..PartJson::default()
        },
        Part::ExecutableCode(code) => PartJson {
            executable_code: Some(code.clone()),
            ..PartJson::default()
        },
        Part::CodeExecutionResult(result) => PartJson {
            code_execution_result: Some(result.clone()),
            ..PartJson::default()
        },
    }
}

fn setup_to_json(setup: &SetupFrame) -> SetupEnvelope {
    let mut tools: Vec<Value> = Vec::new();
    if !setup.tools.is_empty() {
        tools.push(json!({ "functionDeclarations": &setup.tools }));
    }
    if setup.enable_web_search {
        tools.push(json!({ "googleSearch": {} }));
    }
    if setup.enable_code_execution {
        tools.push(json!({ "codeExecution": {} }));
    }

    let speech_config = setup.voice.as_ref().map(|voice| {
        json!({
            "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
        })
    });

    let modalities: Vec<String> = setup
        .response_modalities
        .iter()
        .map(|m| match m {
            Modality::Text => "TEXT".to_string(),
            Modality::Audio => "AUDIO".to_string(),
        })
        .collect();

    let generation = GenerationConfigJson {
        temperature: setup.generation.temperature,
        top_p: setup.generation.top_p,
        top_k: setup.generation.top_k,
        max_output_tokens: setup.generation.max_output_tokens,
        response_mime_type: setup.generation.response_mime_type.clone(),
        response_schema: setup.generation.response_schema.clone(),
        response_modalities: modalities,
        speech_config,
    };

    SetupEnvelope {
        setup: SetupPayload {
            // The wire contract wants the fully-qualified name.
            model: format!("models/{}", setup.model),
            generation_config: Some(generation),
            system_instruction: setup.system_instruction.as_ref().map(|text| ContentJson {
                role: None,
                parts: vec![PartJson {
                    text: Some(text.clone()),
                    ..PartJson::default()
                }],
            }),
            tools,
        },
    }
}

/// Serialize an outbound frame into its JSON envelope.
///
/// `Ping` has no JSON form — the transport sends a protocol-level ping
/// frame instead, and calling this with `Ping` is an internal error.
pub fn encode_client_frame(frame: &ClientFrame) -> Result<String, ClientError> {
    let value = match frame {
        ClientFrame::Setup(setup) => serde_json::to_string(&setup_to_json(setup)),
        ClientFrame::Content(content) => serde_json::to_string(&ClientContentEnvelope {
            client_content: ClientContentJson {
                turns: content
                    .turns
                    .iter()
                    .map(|turn| ContentJson {
                        role: Some(turn.role.clone()),
                        parts: turn.parts.iter().map(part_to_json).collect(),
                    })
                    .collect(),
                turn_complete: content.turn_complete,
            },
        }),
        ClientFrame::ToolResponse(responses) => serde_json::to_string(&ToolResponseEnvelope {
            tool_response: ToolResponseJson {
                function_responses: responses
                    .iter()
                    .map(|r| FunctionResponseJson {
                        id: r.id.clone(),
                        name: r.name.clone(),
                        response: r.response.clone(),
                    })
                    .collect(),
            },
        }),
        ClientFrame::Ping => {
            return Err(ClientError::Internal(
                "keepalive pings are protocol-level frames on this transport".into(),
            ));
        }
    };
    value.map_err(|e| ClientError::Internal(format!("frame serialization failed: {e}")))
}

// ── Decoding ───────────────────────────────────────────────────────

fn part_from_json(part: PartJson) -> Result<Option<Part>, ClientError> {
    if let Some(text) = part.text {
        return Ok(Some(Part::Text(text)));
    }
    if let Some(blob) = part.inline_data {
        let data = BASE64
            .decode(blob.data.as_bytes())
            .map_err(|e| ClientError::Protocol(format!("invalid base64 in inlineData: {e}")))?;
        return Ok(Some(Part::InlineData {
            mime_type: blob.mime_type,
            data,
        }));
    }
    if let Some(call) = part.function_call {
        return Ok(Some(Part::FunctionCall(FunctionCall {
            id: call.id,
            name: call.name,
            args: call.args,
        })));
    }
    if let Some(code) = part.executable_code {
        return Ok(Some(Part::ExecutableCode(code)));
    }
    if let Some(result) = part.code_execution_result {
        return Ok(Some(Part::CodeExecutionResult(result)));
    }
    Ok(None)
}

fn grounding_from_json(value: &Value) -> GroundingMetadata {
    let search_queries = value
        .get("webSearchQueries")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();

    let sources = value
        .get("groundingChunks")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|chunk| chunk.get("web"))
                .filter_map(|web| {
                    web.get("uri").and_then(Value::as_str).map(|uri| GroundingSource {
                        uri: uri.to_string(),
                        title: web
                            .get("title")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    GroundingMetadata {
        search_queries,
        sources,
    }
}

fn server_content_from_json(value: &Value, envelope: &Value) -> Result<ServerContent, ClientError> {
    let mut content = ServerContent {
        turn_complete: value
            .get("turnComplete")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        interrupted: value
            .get("interrupted")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        ..ServerContent::default()
    };

    if let Some(parts) = value.pointer("/modelTurn/parts").and_then(Value::as_array) {
        for raw in parts {
            let part: PartJson = serde_json::from_value(raw.clone())
                .map_err(|e| ClientError::Protocol(format!("malformed part: {e}")))?;
            if let Some(part) = part_from_json(part)? {
                content.parts.push(part);
            }
        }
    }

    if let Some(grounding) = value.get("groundingMetadata") {
        content.grounding = Some(grounding_from_json(grounding));
    }

    if let Some(ratings) = value.get("safetyRatings").and_then(Value::as_array) {
        content.safety_ratings = ratings
            .iter()
            .filter_map(|r| serde_json::from_value::<SafetyRating>(r.clone()).ok())
            .collect();
    }

    // Transcriptions ride alongside serverContent at the envelope level.
    content.input_transcription = envelope
        .pointer("/inputTranscription/text")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string);
    content.output_transcription = envelope
        .pointer("/outputTranscription/text")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string);

    Ok(content)
}

/// Decode one inbound JSON envelope into transport-neutral frames.
///
/// An `error` object in the envelope surfaces as a server error; malformed
/// JSON surfaces as a protocol error (the transport logs and drops those).
pub fn decode_server_message(text: &str) -> Result<Vec<ServerFrame>, ClientError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ClientError::Protocol(format!("unparseable server message: {e}")))?;

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown server error");
        let code = err.get("code").and_then(Value::as_u64).unwrap_or(0);
        #[allow(clippy::cast_possible_truncation)]
        return Err(super::classify::classify_http_status(
            code as u16,
            message,
        ));
    }

    let mut frames = Vec::new();

    if value.get("setupComplete").is_some() {
        frames.push(ServerFrame::SetupComplete);
    }

    if let Some(content) = value.get("serverContent") {
        frames.push(ServerFrame::Content(server_content_from_json(
            content, &value,
        )?));
    } else if value.get("inputTranscription").is_some()
        || value.get("outputTranscription").is_some()
    {
        // Transcription-only envelope.
        frames.push(ServerFrame::Content(server_content_from_json(
            &Value::Object(serde_json::Map::new()),
            &value,
        )?));
    }

    if let Some(calls) = value
        .pointer("/toolCall/functionCalls")
        .and_then(Value::as_array)
    {
        let calls: Vec<FunctionCall> = calls
            .iter()
            .map(|raw| {
                serde_json::from_value::<FunctionCallJson>(raw.clone())
                    .map(|c| FunctionCall {
                        id: c.id,
                        name: c.name,
                        args: c.args,
                    })
                    .map_err(|e| ClientError::Protocol(format!("malformed functionCall: {e}")))
            })
            .collect::<Result<_, _>>()?;
        if !calls.is_empty() {
            frames.push(ServerFrame::ToolCall(calls));
        }
    }

    if let Some(usage) = value.get("usageMetadata") {
        #[allow(clippy::cast_possible_truncation)]
        let count = |key: &str| usage.get(key).and_then(Value::as_i64).unwrap_or(0) as i32;
        frames.push(ServerFrame::Usage(WireUsage {
            prompt_tokens: count("promptTokenCount"),
            response_tokens: count("responseTokenCount"),
            total_tokens: count("totalTokenCount"),
        }));
    }

    if let Some(go_away) = value.get("goAway") {
        frames.push(ServerFrame::GoAway {
            reason: go_away
                .get("timeLeft")
                .and_then(Value::as_str)
                .unwrap_or("server requested reconnect")
                .to_string(),
        });
    }

    Ok(frames)
}
