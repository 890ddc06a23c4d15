//! Receive pipeline: normalize inbound frames into [`StreamOutput`]s.
//!
//! Field mapping:
//!
//! | source | target |
//! |---|---|
//! | text part | appended to `text` |
//! | inline data with `audio/` MIME | `audio` (first wins) |
//! | function-call part / tool-call frame | `function_call` (first only) |
//! | executable code part | `executable_code` |
//! | code-execution result part | `code_execution_result` |
//! | grounding metadata | `grounding_metadata` |
//! | output transcription | appended to `text` |
//! | input transcription | `input_transcription` (carried, never folded) |
//! | turn/setup markers, usage counts | corresponding flags/fields |

use confab_core::{Part, ServerFrame, StreamOutput, UsageMetadata};

/// Normalize one inbound frame.
///
/// `GoAway` frames are handled by the supervisor before extraction and
/// yield an empty output here.
#[must_use]
pub fn extract_output(frame: &ServerFrame) -> StreamOutput {
    let mut output = StreamOutput::default();

    match frame {
        ServerFrame::SetupComplete => output.setup_complete = true,

        ServerFrame::Content(content) => {
            for part in &content.parts {
                match part {
                    Part::Text(text) => output.text.push_str(text),
                    Part::InlineData { mime_type, data } => {
                        if !mime_type.starts_with("audio/") {
                            tracing::debug!(%mime_type, "Ignoring non-audio inline data");
                        } else if output.audio.is_none() {
                            output.audio = Some(data.clone());
                            output.audio_mime = Some(mime_type.clone());
                        } else {
                            tracing::warn!(
                                %mime_type,
                                len = data.len(),
                                "Frame carried more than one audio part — keeping the first"
                            );
                        }
                    }
                    Part::FunctionCall(call) => {
                        if output.function_call.is_none() {
                            output.function_call = Some(call.clone());
                        } else {
                            tracing::warn!(
                                name = %call.name,
                                "Frame carried more than one function call — keeping the first"
                            );
                        }
                    }
                    Part::ExecutableCode(code) => {
                        output.executable_code = Some(code.clone());
                    }
                    Part::CodeExecutionResult(result) => {
                        output.code_execution_result = Some(result.clone());
                    }
                }
            }

            // Voice-only turns still produce message text via the model's
            // own transcription.
            if let Some(transcript) = &content.output_transcription {
                output.text.push_str(transcript);
            }

            // User-speech transcription belongs to the user's message, not
            // the model's: carried through, never folded into `text`.
            output.input_transcription = content.input_transcription.clone();

            output.grounding_metadata = content.grounding.clone();
            output.safety_ratings = content.safety_ratings.clone();
            output.turn_complete = content.turn_complete;
            output.interrupted = content.interrupted;
        }

        ServerFrame::ToolCall(calls) => {
            if let Some(first) = calls.first() {
                output.function_call = Some(first.clone());
            }
            if calls.len() > 1 {
                tracing::warn!(
                    extra = calls.len() - 1,
                    "Tool-call frame carried multiple calls — keeping the first"
                );
            }
        }

        ServerFrame::Usage(usage) => {
            output.usage = Some(UsageMetadata {
                prompt_tokens: usage.prompt_tokens,
                response_tokens: usage.response_tokens,
                total_tokens: usage.total_tokens,
                estimated: false,
            });
        }

        ServerFrame::GoAway { .. } => {}
    }

    output
}
