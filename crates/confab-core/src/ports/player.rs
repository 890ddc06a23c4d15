//! Audio playback port.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

/// Black-box audio playback capability.
///
/// The playback worker is the only caller. `play` must block until the
/// chunk has finished playing, and must observe `cancel` and return
/// promptly when it fires; half-played chunks are dropped without retry.
#[async_trait]
pub trait Player: Send + Sync {
    /// Play one chunk of audio to completion.
    async fn play(&self, cancel: &CancellationToken, audio: &[u8]) -> Result<(), ClientError>;

    /// Whether the bytes handed to [`Self::play`] must carry a WAV header.
    ///
    /// When true, the playback worker prepends a PCM WAV header computed
    /// from the session's declared audio format.
    fn requires_wav_header(&self) -> bool {
        false
    }

    /// Advisory per-chunk startup latency.
    ///
    /// The consolidator widens its size thresholds for players with high
    /// startup cost (external process spawn, device reopen).
    fn estimated_latency(&self) -> Duration {
        Duration::ZERO
    }

    /// Release any held resources. Called exactly once on session close.
    async fn cleanup(&self) -> Result<(), ClientError> {
        Ok(())
    }
}
