//! Audio data types and PCM/WAV helpers.

use std::time::Duration;

use crate::config::AudioFormat;

/// A consolidated unit of playback-ready audio.
///
/// Produced by the consolidator, consumed by the playback worker in strict
/// arrival order (invariant I1).
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Raw PCM bytes.
    pub data: Vec<u8>,
    /// Text associated with this stretch of audio (for captions/UI).
    pub text: String,
    /// Index of the message this audio belongs to.
    pub message_index: usize,
    /// Estimated playback duration, derived from the PCM format.
    pub duration: Duration,
    /// Set when the consolidator flushed while this message was already
    /// playing; playback should begin with minimal buffering.
    pub priority: bool,
}

impl AudioChunk {
    /// Build a chunk, deriving the duration estimate from `format`.
    #[must_use]
    pub fn new(
        data: Vec<u8>,
        text: String,
        message_index: usize,
        priority: bool,
        format: &AudioFormat,
    ) -> Self {
        let duration = format.duration_of(data.len());
        Self {
            data,
            text,
            message_index,
            duration,
            priority,
        }
    }
}

/// Prepend a well-formed 44-byte PCM WAV header to `pcm`.
///
/// Used by the playback worker for players that cannot consume raw PCM.
#[must_use]
pub fn with_wav_header(pcm: &[u8], format: &AudioFormat) -> Vec<u8> {
    #[allow(clippy::cast_possible_truncation)]
    let data_len = pcm.len() as u32;
    let byte_rate = format.sample_rate * u32::from(format.channels) * u32::from(format.bits_per_sample / 8);
    let block_align = format.channels * (format.bits_per_sample / 8);

    let mut out = Vec::with_capacity(44 + pcm.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes()); // PCM fmt chunk size
    out.extend_from_slice(&1u16.to_le_bytes()); // audio format = PCM
    out.extend_from_slice(&format.channels.to_le_bytes());
    out.extend_from_slice(&format.sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&format.bits_per_sample.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_duration_matches_format() {
        let format = AudioFormat::default(); // 48_000 B/s
        let chunk = AudioChunk::new(vec![0; 12_000], String::new(), 0, false, &format);
        assert_eq!(chunk.duration, Duration::from_millis(250));
    }

    #[test]
    fn wav_header_layout() {
        let format = AudioFormat::default();
        let wav = with_wav_header(&[0u8; 100], &format);
        assert_eq!(wav.len(), 144);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // byte rate at offset 28: 24000 * 1 * 2
        assert_eq!(
            u32::from_le_bytes(wav[28..32].try_into().unwrap()),
            48_000
        );
        // data length at offset 40
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 100);
    }
}
