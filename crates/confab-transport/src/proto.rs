//! Hand-authored prost messages for the binary bidi stream, plus the
//! conversions between them and the transport-neutral frame model.
//!
//! There is no vendored `.proto`; the field tags are a crate-internal
//! contract shared by both stream directions. Opaque structured values
//! (tool arguments and results) travel as `prost_types::Struct`.

use std::collections::BTreeMap;

use prost_types::value::Kind;
use serde_json::Value as JsonValue;

use confab_core as domain;
use confab_core::wire;

// ── Messages ───────────────────────────────────────────────────────

/// Envelope for every client → server frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BidiRequest {
    #[prost(oneof = "bidi_request::Payload", tags = "1, 2, 3")]
    pub payload: Option<bidi_request::Payload>,
}

pub mod bidi_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Setup(super::Setup),
        #[prost(message, tag = "2")]
        ClientContent(super::ClientContent),
        #[prost(message, tag = "3")]
        ToolResponse(super::ToolResponse),
    }
}

/// Envelope for every server → client frame. Fields are independent; one
/// response can carry content and usage together.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BidiResponse {
    #[prost(message, optional, tag = "1")]
    pub setup_complete: Option<SetupComplete>,
    #[prost(message, optional, tag = "2")]
    pub server_content: Option<ServerContent>,
    #[prost(message, optional, tag = "3")]
    pub tool_call: Option<ToolCall>,
    #[prost(message, optional, tag = "4")]
    pub usage_metadata: Option<UsageMetadata>,
    #[prost(message, optional, tag = "5")]
    pub go_away: Option<GoAway>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Setup {
    #[prost(string, tag = "1")]
    pub model: String,
    #[prost(message, optional, tag = "2")]
    pub system_instruction: Option<Content>,
    #[prost(message, repeated, tag = "3")]
    pub tools: Vec<Tool>,
    #[prost(message, optional, tag = "4")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetupComplete {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Content {
    #[prost(string, tag = "1")]
    pub role: String,
    #[prost(message, repeated, tag = "2")]
    pub parts: Vec<Part>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Part {
    #[prost(oneof = "part::Data", tags = "1, 2, 3, 4, 5")]
    pub data: Option<part::Data>,
}

pub mod part {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Data {
        #[prost(string, tag = "1")]
        Text(String),
        #[prost(message, tag = "2")]
        InlineData(super::Blob),
        #[prost(message, tag = "3")]
        FunctionCall(super::FunctionCall),
        #[prost(message, tag = "4")]
        ExecutableCode(super::ExecutableCode),
        #[prost(message, tag = "5")]
        CodeExecutionResult(super::CodeExecutionResult),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Blob {
    #[prost(string, tag = "1")]
    pub mime_type: String,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Tool {
    #[prost(message, repeated, tag = "1")]
    pub function_declarations: Vec<FunctionDeclaration>,
    #[prost(message, optional, tag = "2")]
    pub google_search: Option<EmptyTool>,
    #[prost(message, optional, tag = "3")]
    pub code_execution: Option<EmptyTool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EmptyTool {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionDeclaration {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub description: String,
    #[prost(message, optional, tag = "3")]
    pub parameters: Option<prost_types::Struct>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GenerationConfig {
    #[prost(float, optional, tag = "1")]
    pub temperature: Option<f32>,
    #[prost(float, optional, tag = "2")]
    pub top_p: Option<f32>,
    #[prost(int32, optional, tag = "3")]
    pub top_k: Option<i32>,
    #[prost(int32, optional, tag = "4")]
    pub max_output_tokens: Option<i32>,
    #[prost(string, optional, tag = "5")]
    pub response_mime_type: Option<String>,
    #[prost(message, optional, tag = "6")]
    pub response_schema: Option<prost_types::Struct>,
    #[prost(string, repeated, tag = "7")]
    pub response_modalities: Vec<String>,
    #[prost(message, optional, tag = "8")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SpeechConfig {
    #[prost(message, optional, tag = "1")]
    pub voice_config: Option<VoiceConfig>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoiceConfig {
    #[prost(message, optional, tag = "1")]
    pub prebuilt_voice_config: Option<PrebuiltVoiceConfig>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PrebuiltVoiceConfig {
    #[prost(string, tag = "1")]
    pub voice_name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientContent {
    #[prost(message, repeated, tag = "1")]
    pub turns: Vec<Content>,
    #[prost(bool, tag = "2")]
    pub turn_complete: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ToolResponse {
    #[prost(message, repeated, tag = "1")]
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionResponse {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(message, optional, tag = "3")]
    pub response: Option<prost_types::Struct>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionCall {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(message, optional, tag = "3")]
    pub args: Option<prost_types::Struct>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutableCode {
    #[prost(string, tag = "1")]
    pub language: String,
    #[prost(string, tag = "2")]
    pub code: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CodeExecutionResult {
    #[prost(string, tag = "1")]
    pub outcome: String,
    #[prost(string, tag = "2")]
    pub output: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerContent {
    #[prost(message, optional, tag = "1")]
    pub model_turn: Option<Content>,
    #[prost(bool, tag = "2")]
    pub turn_complete: bool,
    #[prost(bool, tag = "3")]
    pub interrupted: bool,
    #[prost(message, optional, tag = "4")]
    pub grounding_metadata: Option<GroundingMetadata>,
    #[prost(message, repeated, tag = "5")]
    pub safety_ratings: Vec<SafetyRating>,
    #[prost(message, optional, tag = "6")]
    pub input_transcription: Option<Transcription>,
    #[prost(message, optional, tag = "7")]
    pub output_transcription: Option<Transcription>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Transcription {
    #[prost(string, tag = "1")]
    pub text: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SafetyRating {
    #[prost(string, tag = "1")]
    pub category: String,
    #[prost(string, tag = "2")]
    pub probability: String,
    #[prost(bool, tag = "3")]
    pub blocked: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroundingMetadata {
    #[prost(string, repeated, tag = "1")]
    pub search_queries: Vec<String>,
    #[prost(message, repeated, tag = "2")]
    pub sources: Vec<GroundingSource>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroundingSource {
    #[prost(string, tag = "1")]
    pub uri: String,
    #[prost(string, tag = "2")]
    pub title: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ToolCall {
    #[prost(message, repeated, tag = "1")]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UsageMetadata {
    #[prost(int32, tag = "1")]
    pub prompt_token_count: i32,
    #[prost(int32, tag = "2")]
    pub response_token_count: i32,
    #[prost(int32, tag = "3")]
    pub total_token_count: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GoAway {
    #[prost(string, tag = "1")]
    pub reason: String,
}

// ── JSON ↔ protobuf Struct ─────────────────────────────────────────

/// Convert a JSON value into a protobuf `Value`.
#[must_use]
pub fn json_to_proto_value(value: &JsonValue) -> prost_types::Value {
    let kind = match value {
        JsonValue::Null => Kind::NullValue(0),
        JsonValue::Bool(b) => Kind::BoolValue(*b),
        JsonValue::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or(0.0)),
        JsonValue::String(s) => Kind::StringValue(s.clone()),
        JsonValue::Array(items) => Kind::ListValue(prost_types::ListValue {
            values: items.iter().map(json_to_proto_value).collect(),
        }),
        JsonValue::Object(_) => Kind::StructValue(json_to_struct(value)),
    };
    prost_types::Value { kind: Some(kind) }
}

/// Convert a JSON value into a protobuf `Struct`.
///
/// Non-object payloads are wrapped under a `result` key, since the wire
/// type is a struct.
#[must_use]
pub fn json_to_struct(value: &JsonValue) -> prost_types::Struct {
    let fields: BTreeMap<String, prost_types::Value> = match value {
        JsonValue::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), json_to_proto_value(v)))
            .collect(),
        JsonValue::Null => BTreeMap::new(),
        other => {
            let mut fields = BTreeMap::new();
            fields.insert("result".to_string(), json_to_proto_value(other));
            fields
        }
    };
    prost_types::Struct { fields }
}

/// Convert a protobuf `Value` back into JSON.
#[must_use]
pub fn proto_value_to_json(value: &prost_types::Value) -> JsonValue {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => JsonValue::Null,
        Some(Kind::BoolValue(b)) => JsonValue::Bool(*b),
        Some(Kind::NumberValue(n)) => serde_json::Number::from_f64(*n)
            .map_or(JsonValue::Null, JsonValue::Number),
        Some(Kind::StringValue(s)) => JsonValue::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            JsonValue::Array(list.values.iter().map(proto_value_to_json).collect())
        }
        Some(Kind::StructValue(s)) => struct_to_json(s),
    }
}

/// Convert a protobuf `Struct` back into a JSON object.
#[must_use]
pub fn struct_to_json(value: &prost_types::Struct) -> JsonValue {
    JsonValue::Object(
        value
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), proto_value_to_json(v)))
            .collect(),
    )
}

// ── Frame conversions ──────────────────────────────────────────────

fn part_to_proto(part: &wire::Part) -> Part {
    let data = match part {
        wire::Part::Text(text) => part::Data::Text(text.clone()),
        wire::Part::InlineData { mime_type, data } => part::Data::InlineData(Blob {
            mime_type: mime_type.clone(),
            data: data.clone(),
        }),
        wire::Part::FunctionCall(call) => part::Data::FunctionCall(FunctionCall {
            id: call.id.clone().unwrap_or_default(),
            name: call.name.clone(),
            args: Some(json_to_struct(&call.args)),
        }),
        wire::Part::ExecutableCode(code) => part::Data::ExecutableCode(ExecutableCode {
            language: code.language.clone(),
            code: code.code.clone(),
        }),
        wire::Part::CodeExecutionResult(result) => {
            part::Data::CodeExecutionResult(CodeExecutionResult {
                outcome: result.outcome.clone(),
                output: result.output.clone(),
            })
        }
    };
    Part { data: Some(data) }
}

fn part_from_proto(part: Part) -> Option<wire::Part> {
    Some(match part.data? {
        part::Data::Text(text) => wire::Part::Text(text),
        part::Data::InlineData(blob) => wire::Part::InlineData {
            mime_type: blob.mime_type,
            data: blob.data,
        },
        part::Data::FunctionCall(call) => wire::Part::FunctionCall(function_call_from_proto(call)),
        part::Data::ExecutableCode(code) => wire::Part::ExecutableCode(domain::ExecutableCode {
            language: code.language,
            code: code.code,
        }),
        part::Data::CodeExecutionResult(result) => {
            wire::Part::CodeExecutionResult(domain::CodeExecutionResult {
                outcome: result.outcome,
                output: result.output,
            })
        }
    })
}

fn function_call_from_proto(call: FunctionCall) -> domain::FunctionCall {
    domain::FunctionCall {
        id: (!call.id.is_empty()).then_some(call.id),
        name: call.name,
        args: call
            .args
            .as_ref()
            .map_or(JsonValue::Null, struct_to_json),
    }
}

fn setup_to_proto(setup: &wire::SetupFrame) -> Setup {
    let mut tools = Vec::new();
    if !setup.tools.is_empty() {
        tools.push(Tool {
            function_declarations: setup
                .tools
                .iter()
                .map(|def| FunctionDeclaration {
                    name: def.name.clone(),
                    description: def.description.clone(),
                    parameters: def.parameters.as_ref().map(json_to_struct),
                })
                .collect(),
            google_search: None,
            code_execution: None,
        });
    }
    if setup.enable_web_search {
        tools.push(Tool {
            function_declarations: Vec::new(),
            google_search: Some(EmptyTool {}),
            code_execution: None,
        });
    }
    if setup.enable_code_execution {
        tools.push(Tool {
            function_declarations: Vec::new(),
            google_search: None,
            code_execution: Some(EmptyTool {}),
        });
    }

    let generation_config = GenerationConfig {
        temperature: setup.generation.temperature,
        top_p: setup.generation.top_p,
        top_k: setup.generation.top_k,
        max_output_tokens: setup.generation.max_output_tokens,
        response_mime_type: setup.generation.response_mime_type.clone(),
        response_schema: setup.generation.response_schema.as_ref().map(json_to_struct),
        response_modalities: setup
            .response_modalities
            .iter()
            .map(|m| match m {
                wire::Modality::Text => "TEXT".to_string(),
                wire::Modality::Audio => "AUDIO".to_string(),
            })
            .collect(),
        speech_config: setup.voice.as_ref().map(|voice| SpeechConfig {
            voice_config: Some(VoiceConfig {
                prebuilt_voice_config: Some(PrebuiltVoiceConfig {
                    voice_name: voice.clone(),
                }),
            }),
        }),
    };

    Setup {
        model: format!("models/{}", setup.model),
        system_instruction: setup.system_instruction.as_ref().map(|text| Content {
            role: String::new(),
            parts: vec![Part {
                data: Some(part::Data::Text(text.clone())),
            }],
        }),
        tools,
        generation_config: Some(generation_config),
    }
}

/// Encode an outbound frame. A `Ping` becomes a zero-content client
/// message on this transport.
#[must_use]
pub fn encode_request(frame: &wire::ClientFrame) -> BidiRequest {
    let payload = match frame {
        wire::ClientFrame::Setup(setup) => bidi_request::Payload::Setup(setup_to_proto(setup)),
        wire::ClientFrame::Content(content) => {
            bidi_request::Payload::ClientContent(ClientContent {
                turns: content
                    .turns
                    .iter()
                    .map(|turn| Content {
                        role: turn.role.clone(),
                        parts: turn.parts.iter().map(part_to_proto).collect(),
                    })
                    .collect(),
                turn_complete: content.turn_complete,
            })
        }
        wire::ClientFrame::ToolResponse(responses) => {
            bidi_request::Payload::ToolResponse(ToolResponse {
                function_responses: responses
                    .iter()
                    .map(|r| FunctionResponse {
                        id: r.id.clone().unwrap_or_default(),
                        name: r.name.clone(),
                        response: Some(json_to_struct(&r.response)),
                    })
                    .collect(),
            })
        }
        wire::ClientFrame::Ping => bidi_request::Payload::ClientContent(ClientContent {
            turns: Vec::new(),
            turn_complete: false,
        }),
    };
    BidiRequest {
        payload: Some(payload),
    }
}

/// Decode one inbound response into transport-neutral frames.
#[must_use]
pub fn decode_response(response: BidiResponse) -> Vec<wire::ServerFrame> {
    let mut frames = Vec::new();

    if response.setup_complete.is_some() {
        frames.push(wire::ServerFrame::SetupComplete);
    }

    if let Some(content) = response.server_content {
        let parts: Vec<wire::Part> = content
            .model_turn
            .map(|turn| turn.parts.into_iter().filter_map(part_from_proto).collect())
            .unwrap_or_default();
        frames.push(wire::ServerFrame::Content(wire::ServerContent {
            parts,
            turn_complete: content.turn_complete,
            interrupted: content.interrupted,
            grounding: content.grounding_metadata.map(|g| domain::GroundingMetadata {
                search_queries: g.search_queries,
                sources: g
                    .sources
                    .into_iter()
                    .map(|s| domain::GroundingSource {
                        uri: s.uri,
                        title: s.title,
                    })
                    .collect(),
            }),
            safety_ratings: content
                .safety_ratings
                .into_iter()
                .map(|r| domain::SafetyRating {
                    category: r.category,
                    probability: r.probability,
                    blocked: r.blocked,
                })
                .collect(),
            input_transcription: content.input_transcription.map(|t| t.text),
            output_transcription: content.output_transcription.map(|t| t.text),
        }));
    }

    if let Some(tool_call) = response.tool_call {
        let calls: Vec<domain::FunctionCall> = tool_call
            .function_calls
            .into_iter()
            .map(function_call_from_proto)
            .collect();
        if !calls.is_empty() {
            frames.push(wire::ServerFrame::ToolCall(calls));
        }
    }

    if let Some(usage) = response.usage_metadata {
        frames.push(wire::ServerFrame::Usage(wire::WireUsage {
            prompt_tokens: usage.prompt_token_count,
            response_tokens: usage.response_token_count,
            total_tokens: usage.total_token_count,
        }));
    }

    if let Some(go_away) = response.go_away {
        frames.push(wire::ServerFrame::GoAway {
            reason: go_away.reason,
        });
    }

    frames
}
