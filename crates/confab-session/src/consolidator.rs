//! Audio consolidator.
//!
//! The server streams many small audio chunks back-to-back for one model
//! turn; playing each directly yields audible gaps and per-chunk startup
//! overhead. The consolidator merges chunks per message and emits as soon
//! as either a size threshold or an adaptive time window trips.
//!
//! All consolidator state is owned by a single actor task; chunk arrivals,
//! turn boundaries, and flush-timer expirations are commands on one
//! mailbox, so no state is ever mutated across task boundaries.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use confab_core::{AudioChunk, AudioFormat};

use crate::playback::PlaybackStatus;
use crate::store::MessageStore;

/// Players whose startup latency is at or above this are treated as
/// overhead-sensitive and get widened size thresholds.
const HIGH_OVERHEAD_LATENCY: Duration = Duration::from_millis(50);

/// How many recent chunk sizes/arrival times to keep for telemetry.
const RECENT_CHUNK_SAMPLES: usize = 10;

/// Consolidation knobs. Defaults are derived from the session's PCM
/// format where they represent stretches of audio.
#[derive(Debug, Clone, Copy)]
pub struct ConsolidatorConfig {
    /// Starting (and floor) value of the adaptive buffer window.
    pub initial_window: Duration,
    /// Ceiling of the adaptive buffer window.
    pub max_window: Duration,
    /// Shorter window used while the same message is already playing.
    pub same_message_window: Duration,
    /// Baseline size threshold for a flush (~0.25 s of PCM).
    pub min_playback_size: usize,
    /// Smaller threshold while the same message is already playing.
    pub continuous_threshold: usize,
    /// Chunks below this count as "small" for window adaptation (~0.1 s).
    pub adaptive_threshold: usize,
    /// Minimum spacing between flushes.
    pub min_flush_interval: Duration,
}

impl ConsolidatorConfig {
    /// Defaults sized for `format`.
    #[must_use]
    pub fn for_format(format: &AudioFormat) -> Self {
        let min_playback_size = format.bytes_for(Duration::from_millis(250)).max(1);
        Self {
            initial_window: Duration::from_millis(200),
            max_window: Duration::from_secs(1),
            same_message_window: Duration::from_millis(200),
            min_playback_size,
            continuous_threshold: (min_playback_size / 2).max(1),
            adaptive_threshold: format.bytes_for(Duration::from_millis(100)).max(1),
            min_flush_interval: Duration::from_millis(50),
        }
    }
}

/// Commands on the consolidator mailbox.
#[derive(Debug)]
pub enum ConsolidatorCmd {
    /// One server-streamed audio chunk.
    Chunk {
        /// Raw PCM bytes.
        data: Vec<u8>,
        /// Text that arrived alongside the audio.
        text: String,
        /// Message the audio belongs to.
        message_index: usize,
    },
    /// The turn ended; flush whatever is buffered.
    TurnBoundary,
    /// The model was interrupted; discard the unflushed buffer.
    DropCurrent,
}

/// The consolidator actor.
pub struct Consolidator {
    config: ConsolidatorConfig,
    format: AudioFormat,
    store: Arc<MessageStore>,
    playback_tx: mpsc::Sender<AudioChunk>,
    playing: Arc<PlaybackStatus>,
    /// Whether the player declared high per-chunk startup overhead.
    overhead_sensitive: bool,

    buffer: Vec<u8>,
    buffer_text: String,
    buffer_start: Option<Instant>,
    buffer_message_index: Option<usize>,
    /// Window armed for the current buffer.
    active_window: Duration,
    /// Adaptive window used for new buffers (clamped to
    /// `[initial_window, max_window]`).
    current_window: Duration,
    /// Pending flush deadline, if a buffer is armed.
    deadline: Option<Instant>,

    recent_chunk_sizes: VecDeque<usize>,
    recent_chunk_times: VecDeque<Instant>,
    consecutive_small_chunks: u32,
    last_flush: Option<Instant>,
    last_known_index: Option<usize>,
}

impl Consolidator {
    /// Assemble the actor.
    #[must_use]
    pub fn new(
        config: ConsolidatorConfig,
        format: AudioFormat,
        store: Arc<MessageStore>,
        playback_tx: mpsc::Sender<AudioChunk>,
        playing: Arc<PlaybackStatus>,
        player_latency: Duration,
    ) -> Self {
        Self {
            current_window: config.initial_window,
            active_window: config.initial_window,
            config,
            format,
            store,
            playback_tx,
            playing,
            overhead_sensitive: player_latency >= HIGH_OVERHEAD_LATENCY,
            buffer: Vec::new(),
            buffer_text: String::new(),
            buffer_start: None,
            buffer_message_index: None,
            deadline: None,
            recent_chunk_sizes: VecDeque::with_capacity(RECENT_CHUNK_SAMPLES),
            recent_chunk_times: VecDeque::with_capacity(RECENT_CHUNK_SAMPLES),
            consecutive_small_chunks: 0,
            last_flush: None,
            last_known_index: None,
        }
    }

    /// Run the actor until the mailbox closes or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken, mut rx: mpsc::Receiver<ConsolidatorCmd>) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                () = cancel.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => {
                        // Mailbox closed: flush what is left and stop.
                        self.flush(true);
                        break;
                    }
                },
                () = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.flush(false);
                }
            }
        }
        tracing::debug!("Consolidator stopped");
    }

    /// Dispatch one mailbox command.
    pub(crate) fn handle(&mut self, cmd: ConsolidatorCmd) {
        match cmd {
            ConsolidatorCmd::Chunk {
                data,
                text,
                message_index,
            } => self.consolidate(data, text, message_index),
            ConsolidatorCmd::TurnBoundary => self.flush(true),
            ConsolidatorCmd::DropCurrent => self.discard(),
        }
    }

    /// Entry point for one streamed chunk.
    pub(crate) fn consolidate(&mut self, data: Vec<u8>, text: String, message_index: usize) {
        // Empty chunks never arm a timer.
        if data.is_empty() {
            return;
        }

        let Some(index) = self.resolve_index(message_index) else {
            tracing::warn!(message_index, "Audio chunk with no message to attach to — dropping");
            return;
        };

        let now = Instant::now();
        self.record_chunk(data.len(), now);

        let playing_same = self.playing.is_playing(index);

        if self.buffer_message_index != Some(index) || self.buffer.is_empty() {
            // New message (or first chunk): flush the old buffer first —
            // its own message index wins.
            self.flush(true);

            self.buffer_start = Some(now);
            self.buffer_message_index = Some(index);
            // Shorter window while this message is already audible, to
            // minimize inter-segment gaps.
            self.active_window = if playing_same {
                self.config.same_message_window
            } else {
                self.current_window
            };
            self.deadline = Some(now + self.active_window);
        } else {
            // Continuation of the same message.
            let age = self
                .buffer_start
                .map_or(Duration::ZERO, |start| now - start);
            if !playing_same
                && data.len() < self.config.adaptive_threshold
                && age < self.active_window / 2
            {
                self.adapt_window(true);
                self.active_window = self.current_window;
            }
            self.deadline = Some(now + self.active_window);
        }

        self.buffer.extend_from_slice(&data);
        if !text.is_empty() {
            self.buffer_text.push_str(&text);
        }

        if self.buffer.len() >= self.size_threshold(playing_same) {
            self.flush(false);
        }
    }

    /// Flush the buffer to the store and the playback queue.
    ///
    /// Unforced flushes are throttled: within `min_flush_interval` of the
    /// previous flush, an undersized buffer for a message that is not
    /// currently audible is rescheduled instead of emitted.
    pub(crate) fn flush(&mut self, force: bool) {
        if self.buffer.is_empty() {
            self.deadline = None;
            return;
        }

        let Some(index) = self.buffer_message_index else {
            self.deadline = None;
            self.buffer.clear();
            self.buffer_text.clear();
            return;
        };

        let now = Instant::now();
        let playing_same = self.playing.is_playing(index);

        if !force {
            if let Some(last) = self.last_flush {
                let since = now - last;
                if since < self.config.min_flush_interval
                    && self.buffer.len() < self.size_threshold(playing_same)
                    && !playing_same
                {
                    // Too soon: retry when the interval has elapsed.
                    self.deadline = Some(last + self.config.min_flush_interval);
                    return;
                }
            }
        }

        let data = std::mem::take(&mut self.buffer);
        let text = std::mem::take(&mut self.buffer_text);
        self.buffer_start = None;
        self.buffer_message_index = None;
        self.deadline = None;
        self.last_flush = Some(now);

        self.store.extend_audio(index, &data);

        let avg_chunk = if self.recent_chunk_sizes.is_empty() {
            0
        } else {
            self.recent_chunk_sizes.iter().sum::<usize>() / self.recent_chunk_sizes.len()
        };
        tracing::debug!(
            message_index = index,
            bytes = data.len(),
            avg_recent_chunk = avg_chunk,
            window_ms = self.active_window.as_millis() as u64,
            priority = playing_same,
            "Flushing consolidated audio"
        );

        let chunk = AudioChunk::new(data, text, index, playing_same, &self.format);
        match self.playback_tx.try_send(chunk) {
            Ok(()) => {}
            Err(TrySendError::Full(chunk)) => {
                // Queue overflow is non-fatal: drop the chunk, keep going.
                tracing::warn!(
                    message_index = chunk.message_index,
                    bytes = chunk.data.len(),
                    "Playback queue full — dropping consolidated chunk"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Playback queue closed");
            }
        }
    }

    /// Discard the unflushed buffer (model interrupted).
    pub(crate) fn discard(&mut self) {
        if !self.buffer.is_empty() {
            tracing::debug!(bytes = self.buffer.len(), "Discarding interrupted audio buffer");
        }
        self.buffer.clear();
        self.buffer_text.clear();
        self.buffer_start = None;
        self.buffer_message_index = None;
        self.deadline = None;
    }

    /// Grow or shrink the adaptive window.
    fn adapt_window(&mut self, increase: bool) {
        let next = if increase && self.consecutive_small_chunks >= 3 {
            self.current_window
                .mul_f64(1.2)
                .min(self.config.max_window)
        } else {
            self.current_window
                .mul_f64(0.9)
                .max(self.config.initial_window)
        };
        if next != self.current_window {
            tracing::trace!(
                from_ms = self.current_window.as_millis() as u64,
                to_ms = next.as_millis() as u64,
                "Adapted buffer window"
            );
            self.current_window = next;
        }
    }

    /// The flush size threshold for the current player and playback state.
    fn size_threshold(&self, playing_same: bool) -> usize {
        let base = self.config.min_playback_size;
        if self.overhead_sensitive {
            // Fewer, larger chunks amortize expensive playback startup.
            if playing_same { base * 3 / 2 } else { base * 2 }
        } else if playing_same {
            self.config.continuous_threshold
        } else {
            base
        }
    }

    /// Validate a message index, retargeting to the last known one when
    /// it is out of range.
    fn resolve_index(&mut self, message_index: usize) -> Option<usize> {
        if message_index < self.store.len() {
            self.last_known_index = Some(message_index);
            return Some(message_index);
        }
        let fallback = self.last_known_index.or_else(|| self.store.last_index())?;
        tracing::warn!(
            message_index,
            fallback,
            "Audio chunk targeted an unknown message — retargeting"
        );
        self.last_known_index = Some(fallback);
        Some(fallback)
    }

    fn record_chunk(&mut self, size: usize, at: Instant) {
        if self.recent_chunk_sizes.len() == RECENT_CHUNK_SAMPLES {
            self.recent_chunk_sizes.pop_front();
            self.recent_chunk_times.pop_front();
        }
        self.recent_chunk_sizes.push_back(size);
        self.recent_chunk_times.push_back(at);
        if size < self.config.adaptive_threshold {
            self.consecutive_small_chunks += 1;
        } else {
            self.consecutive_small_chunks = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_core::Message;

    fn test_config() -> ConsolidatorConfig {
        ConsolidatorConfig {
            initial_window: Duration::from_millis(200),
            max_window: Duration::from_secs(1),
            same_message_window: Duration::from_millis(200),
            min_playback_size: 6000,
            continuous_threshold: 3000,
            adaptive_threshold: 1000,
            min_flush_interval: Duration::from_millis(50),
        }
    }

    struct Fixture {
        consolidator: Consolidator,
        store: Arc<MessageStore>,
        playing: Arc<PlaybackStatus>,
        rx: mpsc::Receiver<AudioChunk>,
    }

    fn fixture_with_latency(latency: Duration) -> Fixture {
        let store = Arc::new(MessageStore::new());
        store.push(Message::user("hello"));
        store.push(Message::model());
        let playing = PlaybackStatus::new();
        let (tx, rx) = mpsc::channel(16);
        let consolidator = Consolidator::new(
            test_config(),
            AudioFormat::default(),
            store.clone(),
            tx,
            playing.clone(),
            latency,
        );
        Fixture {
            consolidator,
            store,
            playing,
            rx,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_latency(Duration::ZERO)
    }

    #[tokio::test(start_paused = true)]
    async fn size_threshold_consolidation() {
        let mut f = fixture();
        // 20 chunks of 800 bytes for message 1, streamed back-to-back.
        for _ in 0..20 {
            f.consolidator.consolidate(vec![0u8; 800], String::new(), 1);
        }
        f.consolidator.handle(ConsolidatorCmd::TurnBoundary);

        let mut sizes = Vec::new();
        while let Ok(chunk) = f.rx.try_recv() {
            assert_eq!(chunk.message_index, 1);
            sizes.push(chunk.data.len());
        }
        assert_eq!(sizes, vec![6400, 6400, 3200]);
        assert_eq!(
            f.store.get(1).unwrap().audio_data.map(|a| a.len()),
            Some(16_000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_chunk_never_arms_timer() {
        let mut f = fixture();
        f.consolidator.consolidate(Vec::new(), String::new(), 1);
        assert!(f.consolidator.deadline.is_none());
        assert!(f.consolidator.buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_index_retargets_to_last_known() {
        let mut f = fixture();
        f.consolidator.consolidate(vec![1u8; 100], String::new(), 1);
        // Index 9 does not exist; the chunk lands on message 1.
        f.consolidator.consolidate(vec![2u8; 100], String::new(), 9);
        f.consolidator.handle(ConsolidatorCmd::TurnBoundary);

        let chunk = f.rx.try_recv().unwrap();
        assert_eq!(chunk.message_index, 1);
        assert_eq!(chunk.data.len(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn message_change_flushes_previous_buffer_first() {
        let mut f = fixture();
        f.consolidator.consolidate(vec![1u8; 500], String::new(), 0);
        f.consolidator.consolidate(vec![2u8; 500], String::new(), 1);

        let first = f.rx.try_recv().unwrap();
        assert_eq!(first.message_index, 0);
        assert_eq!(first.data.len(), 500);
        // Second message still buffered.
        assert!(f.rx.try_recv().is_err());
        assert_eq!(f.consolidator.buffer_message_index, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn window_grows_after_consecutive_small_chunks() {
        let mut f = fixture();
        let start = f.consolidator.current_window;
        // Small chunks (below adaptive_threshold = 1000) for one message,
        // arriving young: after the third, adaptation kicks in.
        for _ in 0..5 {
            f.consolidator.consolidate(vec![0u8; 100], String::new(), 1);
        }
        assert!(f.consolidator.current_window > start);
        assert!(f.consolidator.current_window <= f.consolidator.config.max_window);
    }

    #[tokio::test(start_paused = true)]
    async fn window_shrinks_when_chunks_are_large_again() {
        let mut f = fixture();
        for _ in 0..5 {
            f.consolidator.consolidate(vec![0u8; 100], String::new(), 1);
        }
        let grown = f.consolidator.current_window;
        // A large chunk resets the small-chunk streak; the next young small
        // chunk now shrinks the window.
        f.consolidator.consolidate(vec![0u8; 2000], String::new(), 1);
        f.consolidator.consolidate(vec![0u8; 100], String::new(), 1);
        assert!(f.consolidator.current_window < grown);
    }

    #[tokio::test(start_paused = true)]
    async fn same_message_playback_uses_continuous_threshold() {
        let mut f = fixture();
        f.playing.set(1);
        // continuous_threshold is 3000: four 800-byte chunks trip it.
        for _ in 0..4 {
            f.consolidator.consolidate(vec![0u8; 800], String::new(), 1);
        }
        let chunk = f.rx.try_recv().unwrap();
        assert_eq!(chunk.data.len(), 3200);
        assert!(chunk.priority);
    }

    #[tokio::test(start_paused = true)]
    async fn overhead_sensitive_player_widens_threshold() {
        let mut f = fixture_with_latency(Duration::from_millis(80));
        // 2× min_playback_size = 12000 when not playing: 6400 must NOT flush.
        for _ in 0..8 {
            f.consolidator.consolidate(vec![0u8; 800], String::new(), 1);
        }
        assert!(f.rx.try_recv().is_err());
        for _ in 0..8 {
            f.consolidator.consolidate(vec![0u8; 800], String::new(), 1);
        }
        let chunk = f.rx.try_recv().unwrap();
        assert_eq!(chunk.data.len(), 12_800);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_defers_rapid_undersized_flush() {
        let mut f = fixture();
        // First flush establishes last_flush.
        for _ in 0..8 {
            f.consolidator.consolidate(vec![0u8; 800], String::new(), 1);
        }
        assert_eq!(f.rx.try_recv().unwrap().data.len(), 6400);

        // A small tail arrives immediately; a timer-style (unforced) flush
        // inside the interval must reschedule instead of emitting.
        f.consolidator.consolidate(vec![0u8; 400], String::new(), 1);
        f.consolidator.flush(false);
        assert!(f.rx.try_recv().is_err());
        assert!(f.consolidator.deadline.is_some());
        assert_eq!(f.consolidator.buffer.len(), 400);

        // Forced flush (turn boundary) goes through regardless.
        f.consolidator.flush(true);
        assert_eq!(f.rx.try_recv().unwrap().data.len(), 400);
    }

    #[tokio::test(start_paused = true)]
    async fn interruption_discards_buffered_audio() {
        let mut f = fixture();
        f.consolidator.consolidate(vec![0u8; 500], String::new(), 1);
        f.consolidator.handle(ConsolidatorCmd::DropCurrent);
        f.consolidator.handle(ConsolidatorCmd::TurnBoundary);
        assert!(f.rx.try_recv().is_err());
        assert!(f.store.get(1).unwrap().audio_data.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flush_fires_through_the_actor() {
        let store = Arc::new(MessageStore::new());
        store.push(Message::model());
        let playing = PlaybackStatus::new();
        let (tx, mut rx) = mpsc::channel(16);
        let consolidator = Consolidator::new(
            test_config(),
            AudioFormat::default(),
            store.clone(),
            tx,
            playing,
            Duration::ZERO,
        );
        let cancel = CancellationToken::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let handle = tokio::spawn(consolidator.run(cancel.clone(), cmd_rx));

        cmd_tx
            .send(ConsolidatorCmd::Chunk {
                data: vec![0u8; 500],
                text: String::new(),
                message_index: 0,
            })
            .await
            .unwrap();

        // Under-threshold: nothing yet. The 200 ms window then trips.
        tokio::time::sleep(Duration::from_millis(250)).await;
        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.data.len(), 500);

        cancel.cancel();
        handle.await.unwrap();
    }
}
