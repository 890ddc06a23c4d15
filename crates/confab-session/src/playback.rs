//! Playback worker: single serialized consumer of the playback queue.
//!
//! Exactly one worker runs per session (invariant I1). Chunks are played
//! in arrival order; playback errors skip the chunk and continue, while
//! cancellation ends the loop silently.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use confab_core::{AudioChunk, AudioFormat, ClientError, Player, SessionEvent, with_wav_header};

use crate::bus::EventBus;

/// Default bound on the playback queue.
pub const DEFAULT_PLAYBACK_CAPACITY: usize = 32;

/// Which message the worker is currently playing, shared with the
/// consolidator for its same-message threshold decisions.
#[derive(Debug, Default)]
pub struct PlaybackStatus {
    /// Message index currently playing, or -1 when idle.
    current: AtomicI64,
}

impl PlaybackStatus {
    /// A status with nothing playing.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let status = Self {
            current: AtomicI64::new(-1),
        };
        Arc::new(status)
    }

    pub(crate) fn set(&self, index: usize) {
        #[allow(clippy::cast_possible_wrap)]
        self.current.store(index as i64, Ordering::SeqCst);
    }

    pub(crate) fn clear(&self) {
        self.current.store(-1, Ordering::SeqCst);
    }

    /// Message index currently playing, if any.
    #[must_use]
    pub fn playing_index(&self) -> Option<usize> {
        let raw = self.current.load(Ordering::SeqCst);
        usize::try_from(raw).ok()
    }

    /// Whether the worker is playing audio for `index` right now.
    #[must_use]
    pub fn is_playing(&self, index: usize) -> bool {
        self.playing_index() == Some(index)
    }
}

/// The playback worker task.
pub struct PlaybackWorker {
    player: Arc<dyn Player>,
    format: AudioFormat,
    status: Arc<PlaybackStatus>,
    bus: EventBus,
}

impl PlaybackWorker {
    /// Assemble a worker. `status` is shared with the consolidator.
    #[must_use]
    pub fn new(
        player: Arc<dyn Player>,
        format: AudioFormat,
        status: Arc<PlaybackStatus>,
        bus: EventBus,
    ) -> Self {
        Self {
            player,
            format,
            status,
            bus,
        }
    }

    /// Consume the playback queue until it closes or `cancel` fires.
    pub async fn run(self, cancel: CancellationToken, mut rx: mpsc::Receiver<AudioChunk>) {
        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => break,
                chunk = rx.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => break,
                },
            };

            self.status.set(chunk.message_index);
            self.bus.emit(SessionEvent::PlaybackStarted {
                message_index: chunk.message_index,
                bytes: chunk.data.len(),
                duration: chunk.duration,
            });

            let bytes = if self.player.requires_wav_header() {
                with_wav_header(&chunk.data, &self.format)
            } else {
                chunk.data
            };

            match self.player.play(&cancel, &bytes).await {
                Ok(()) => {
                    self.status.clear();
                    self.bus.emit(SessionEvent::PlaybackCompleted {
                        message_index: chunk.message_index,
                    });
                }
                Err(ClientError::Cancelled) => {
                    // Half-played chunks are dropped without events.
                    self.status.clear();
                    break;
                }
                Err(err) => {
                    // Playback errors are never fatal for the session.
                    tracing::warn!(
                        message_index = chunk.message_index,
                        error = %err,
                        "Playback failed — skipping chunk"
                    );
                    self.status.clear();
                    self.bus.emit(SessionEvent::PlaybackError(err.to_string()));
                }
            }
        }
        tracing::debug!("Playback worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Player that records what it was asked to play.
    #[derive(Default)]
    struct RecordingPlayer {
        played: Mutex<Vec<Vec<u8>>>,
        wants_wav: bool,
        fail_on_call: Option<usize>,
        block_until_cancel: bool,
    }

    #[async_trait]
    impl Player for RecordingPlayer {
        async fn play(
            &self,
            cancel: &CancellationToken,
            audio: &[u8],
        ) -> Result<(), ClientError> {
            if self.block_until_cancel {
                cancel.cancelled().await;
                return Err(ClientError::Cancelled);
            }
            let call_index = {
                let mut played = self.played.lock().unwrap();
                played.push(audio.to_vec());
                played.len() - 1
            };
            if self.fail_on_call == Some(call_index) {
                return Err(ClientError::Playback("device gone".into()));
            }
            Ok(())
        }

        fn requires_wav_header(&self) -> bool {
            self.wants_wav
        }
    }

    fn chunk(index: usize, data: Vec<u8>) -> AudioChunk {
        AudioChunk::new(data, String::new(), index, false, &AudioFormat::default())
    }

    #[tokio::test]
    async fn plays_chunks_in_arrival_order() {
        let player = Arc::new(RecordingPlayer::default());
        let (bus, mut events) = EventBus::new(16);
        let status = PlaybackStatus::new();
        let worker = PlaybackWorker::new(
            player.clone(),
            AudioFormat::default(),
            status,
            bus,
        );
        let (tx, rx) = mpsc::channel(8);
        tx.send(chunk(0, vec![1])).await.unwrap();
        tx.send(chunk(0, vec![2])).await.unwrap();
        drop(tx);
        worker.run(CancellationToken::new(), rx).await;

        assert_eq!(*player.played.lock().unwrap(), vec![vec![1], vec![2]]);
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::PlaybackStarted { bytes: 1, .. })
        ));
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::PlaybackCompleted { .. })
        ));
    }

    #[tokio::test]
    async fn wav_header_is_prepended_when_required() {
        let player = Arc::new(RecordingPlayer {
            wants_wav: true,
            ..RecordingPlayer::default()
        });
        let (bus, _events) = EventBus::new(16);
        let worker = PlaybackWorker::new(
            player.clone(),
            AudioFormat::default(),
            PlaybackStatus::new(),
            bus,
        );
        let (tx, rx) = mpsc::channel(4);
        tx.send(chunk(0, vec![0; 100])).await.unwrap();
        drop(tx);
        worker.run(CancellationToken::new(), rx).await;

        let played = player.played.lock().unwrap();
        assert_eq!(played[0].len(), 144);
        assert_eq!(&played[0][0..4], b"RIFF");
    }

    #[tokio::test]
    async fn play_errors_are_skipped_not_fatal() {
        let player = Arc::new(RecordingPlayer {
            fail_on_call: Some(0),
            ..RecordingPlayer::default()
        });
        let (bus, mut events) = EventBus::new(16);
        let worker = PlaybackWorker::new(
            player.clone(),
            AudioFormat::default(),
            PlaybackStatus::new(),
            bus,
        );
        let (tx, rx) = mpsc::channel(4);
        tx.send(chunk(0, vec![1])).await.unwrap();
        tx.send(chunk(1, vec![2])).await.unwrap();
        drop(tx);
        worker.run(CancellationToken::new(), rx).await;

        assert_eq!(player.played.lock().unwrap().len(), 2);
        // Started(0), Error, Started(1), Completed(1)
        let mut saw_error = false;
        let mut saw_completed = false;
        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::PlaybackError(_) => saw_error = true,
                SessionEvent::PlaybackCompleted { message_index: 1 } => saw_completed = true,
                _ => {}
            }
        }
        assert!(saw_error);
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn cancellation_mid_chunk_exits_without_events() {
        let player = Arc::new(RecordingPlayer {
            block_until_cancel: true,
            ..RecordingPlayer::default()
        });
        let (bus, mut events) = EventBus::new(16);
        let status = PlaybackStatus::new();
        let worker = PlaybackWorker::new(
            player,
            AudioFormat::default(),
            status.clone(),
            bus,
        );
        let (tx, rx) = mpsc::channel(4);
        tx.send(chunk(3, vec![1; 10])).await.unwrap();

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(worker.run(cancel, rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel_clone.cancel();
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("worker must exit promptly on cancel")
            .unwrap();

        assert_eq!(status.playing_index(), None);
        // PlaybackStarted was emitted, but no completion/error after cancel.
        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::PlaybackStarted { message_index: 3, .. })
        ));
        assert!(events.try_recv().is_err());
    }
}
