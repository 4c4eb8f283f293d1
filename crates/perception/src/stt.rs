//! The STT driver (spec §4.1).
//!
//! Per the cross-language redesign note in spec §9, the four callback sinks
//! (`on_partial`, `on_final`, `on_ready`, `on_error`) of the source system
//! are replaced here with a single typed event channel: [`SttEvent`]. A
//! caller `start_session`s to get an [`SttHandle`] wrapping that channel
//! plus the session's `send_audio`/`stop` operations; the handle is not
//! shared across streams, matching "one stateful handle per `start_session`
//! call".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sa_domain::config::SttDriverConfig;
use sa_domain::error::{Error, Result};
use sa_domain::perception::{Modality, PerceptionEvent, Stage};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Per-session STT configuration (spec §4.1 Config).
#[derive(Debug, Clone)]
pub struct SttSessionConfig {
    pub model: String,
    pub language: String,
    pub sample_rate: u32,
    pub enable_punctuation: bool,
    pub enable_itn: bool,
    pub hotwords: Option<Vec<String>>,
    pub max_sentence_silence_ms: u64,
    pub enable_words: bool,
}

impl Default for SttSessionConfig {
    fn default() -> Self {
        Self {
            model: "paraformer-realtime-v2".into(),
            language: "zh-CN".into(),
            sample_rate: 16000,
            enable_punctuation: true,
            enable_itn: false,
            hotwords: None,
            max_sentence_silence_ms: 800,
            enable_words: false,
        }
    }
}

/// Events emitted on an [`SttHandle`]'s channel. `Ready` corresponds to the
/// driver's `on_ready` sink; the rest carry a [`PerceptionEvent`] whose
/// `stage` distinguishes partial/final/error.
#[derive(Debug, Clone)]
pub enum SttEvent {
    Ready { session_id: String },
    Transcript(PerceptionEvent),
    /// Emitted once per injected keep-alive silence frame. Internal-only —
    /// the stream handler must never forward this to the client (spec
    /// §4.1: keep-alive is "unobservable to the client").
    KeepAliveInjected,
}

/// A running recognition session: the handle returned by
/// [`SttDriver::start_session`]. Owns the audio-forwarding channel and the
/// event stream; dropping it tears the session down.
pub struct SttHandle {
    session_id: String,
    audio_tx: mpsc::Sender<AudioCmd>,
    events_rx: mpsc::Receiver<SttEvent>,
    running: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

enum AudioCmd {
    Audio(Vec<u8>),
    Flush,
    Stop,
}

impl SttHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Forward a PCM chunk to the upstream session. Per spec §4.1, if the
    /// session is no longer running this is silently dropped rather than
    /// erroring (a race with a concurrent stop is expected, not exceptional).
    pub fn send_audio(&self, bytes: Vec<u8>) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let _ = self.audio_tx.try_send(AudioCmd::Audio(bytes));
    }

    /// Ask the backend to finalize any buffered partial immediately (the
    /// stream handler's FLUSH control frame).
    pub async fn flush(&self) {
        let _ = self.audio_tx.send(AudioCmd::Flush).await;
    }

    /// Tear the session down. Idempotent: stopping an already-stopped
    /// session is a no-op.
    pub async fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _ = self.audio_tx.send(AudioCmd::Stop).await;
        }
    }

    pub async fn recv(&mut self) -> Option<SttEvent> {
        self.events_rx.recv().await
    }

    /// A cloneable, send-only view of this session. Lets a caller hand the
    /// `SttHandle` itself (and its `recv` loop) off to one task while
    /// keeping the ability to push audio / flush / stop from another —
    /// exactly the split the bidirectional stream handler needs between its
    /// request reader and its STT event relay.
    pub fn sink(&self) -> AudioSink {
        AudioSink {
            audio_tx: self.audio_tx.clone(),
            running: Arc::clone(&self.running),
        }
    }
}

/// See [`SttHandle::sink`].
#[derive(Clone)]
pub struct AudioSink {
    audio_tx: mpsc::Sender<AudioCmd>,
    running: Arc<AtomicBool>,
}

impl AudioSink {
    pub fn send_audio(&self, bytes: Vec<u8>) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let _ = self.audio_tx.try_send(AudioCmd::Audio(bytes));
    }

    pub async fn flush(&self) {
        let _ = self.audio_tx.send(AudioCmd::Flush).await;
    }

    pub async fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _ = self.audio_tx.send(AudioCmd::Stop).await;
        }
    }
}

impl Drop for SttHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.task.abort();
    }
}

/// Contract every STT backend implements (spec §4.1).
#[async_trait]
pub trait SttDriver: Send + Sync {
    async fn start_session(&self, session_id: String, cfg: SttSessionConfig) -> Result<SttHandle>;

    /// Feed a complete buffer through a throwaway session, chunked to
    /// 100ms frames with short pacing, and await the concatenation of its
    /// FINAL texts (bounded by `transcribe_once_timeout_secs`).
    async fn transcribe_once(&self, audio: &[u8], cfg: SttSessionConfig) -> Result<String> {
        let mut handle = self
            .start_session(format!("once-{}", Uuid::new_v4()), cfg)
            .await?;
        const FRAME_BYTES: usize = 3200; // 100ms @ 16kHz, 16-bit mono
        for chunk in audio.chunks(FRAME_BYTES) {
            handle.send_audio(chunk.to_vec());
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.flush().await;
        handle.stop().await;

        let timeout = Duration::from_secs(self.keepalive_config().transcribe_once_timeout_secs);
        let deadline = tokio::time::Instant::now() + timeout;
        let mut text = String::new();
        loop {
            match tokio::time::timeout_at(deadline, handle.recv()).await {
                Ok(Some(SttEvent::Transcript(event))) if event.stage == Stage::Final => {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(event.content.trim());
                }
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => return Err(Error::Timeout("transcribe_once".into())),
            }
        }
        Ok(text)
    }

    /// The driver-internal timing config (keep-alive interval, silence
    /// frame size, one-shot timeout) used by the default `transcribe_once`.
    fn keepalive_config(&self) -> &SttDriverConfig;
}

/// The only backend available without a live upstream recognizer (real STT
/// vendors are explicitly out of scope, see spec §1). It treats inbound PCM
/// bytes as literal UTF-8 text — a deliberate stand-in that keeps tests and
/// local development deterministic without decoding actual audio. A `\n`
/// byte in the inbound bytes marks an utterance boundary: text before it is
/// finalized, text after it starts the next partial. All-zero byte frames
/// (the shape of an injected keep-alive silence frame) are never echoed.
pub struct MockSttBackend {
    config: SttDriverConfig,
}

impl MockSttBackend {
    pub fn new(config: SttDriverConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SttDriver for MockSttBackend {
    async fn start_session(&self, session_id: String, _cfg: SttSessionConfig) -> Result<SttHandle> {
        sa_domain::trace::TraceEvent::SttSessionStarted {
            session_id: session_id.clone(),
            backend: "mock".into(),
        }
        .emit();

        let (audio_tx, audio_rx) = mpsc::channel(256);
        let (events_tx, events_rx) = mpsc::channel(256);
        let running = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(run_mock_session(
            session_id.clone(),
            self.config.clone(),
            audio_rx,
            events_tx,
            Arc::clone(&running),
        ));

        Ok(SttHandle {
            session_id,
            audio_tx,
            events_rx,
            running,
            task,
        })
    }

    fn keepalive_config(&self) -> &SttDriverConfig {
        &self.config
    }
}

async fn run_mock_session(
    session_id: String,
    driver_cfg: SttDriverConfig,
    mut audio_rx: mpsc::Receiver<AudioCmd>,
    events_tx: mpsc::Sender<SttEvent>,
    running: Arc<AtomicBool>,
) {
    let _ = events_tx
        .send(SttEvent::Ready {
            session_id: session_id.clone(),
        })
        .await;

    let mut buffer = String::new();
    let mut last_audio_at = tokio::time::Instant::now();
    let mut keepalive = tokio::time::interval(Duration::from_secs(
        driver_cfg.keepalive_interval_secs.max(1),
    ));
    keepalive.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            cmd = audio_rx.recv() => {
                match cmd {
                    Some(AudioCmd::Audio(bytes)) => {
                        last_audio_at = tokio::time::Instant::now();
                        if bytes.iter().all(|b| *b == 0) {
                            continue; // silence / keep-alive frame, never transcribed
                        }
                        let Ok(text) = std::str::from_utf8(&bytes) else { continue };
                        ingest(text, &mut buffer, &session_id, &events_tx).await;
                    }
                    Some(AudioCmd::Flush) => {
                        finalize(&mut buffer, &session_id, &events_tx).await;
                    }
                    Some(AudioCmd::Stop) | None => break,
                }
            }
            _ = keepalive.tick() => {
                if running.load(Ordering::Acquire)
                    && last_audio_at.elapsed() >= Duration::from_secs(driver_cfg.keepalive_interval_secs)
                {
                    let _ = events_tx.send(SttEvent::KeepAliveInjected).await;
                }
            }
        }
    }

    sa_domain::trace::TraceEvent::SttSessionStopped {
        session_id: session_id.clone(),
    }
    .emit();
}

async fn ingest(text: &str, buffer: &mut String, session_id: &str, events_tx: &mpsc::Sender<SttEvent>) {
    for ch in text.chars() {
        if ch == '\n' {
            finalize(buffer, session_id, events_tx).await;
        } else {
            buffer.push(ch);
            let event = PerceptionEvent::new(Modality::Audio, Stage::Partial, buffer.clone());
            let _ = events_tx.send(SttEvent::Transcript(event)).await;
        }
    }
}

async fn finalize(buffer: &mut String, _session_id: &str, events_tx: &mpsc::Sender<SttEvent>) {
    let trimmed = buffer.trim().to_string();
    buffer.clear();
    if trimmed.is_empty() {
        return;
    }
    let event = PerceptionEvent::new(Modality::Audio, Stage::Final, trimmed);
    let _ = events_tx.send(SttEvent::Transcript(event)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MockSttBackend {
        MockSttBackend::new(SttDriverConfig::default())
    }

    #[tokio::test]
    async fn partials_precede_final_for_one_pass() {
        let driver = backend();
        let mut handle = driver
            .start_session("s1".into(), SttSessionConfig::default())
            .await
            .unwrap();
        assert!(matches!(handle.recv().await, Some(SttEvent::Ready { .. })));

        handle.send_audio(b"hi\n".to_vec());

        let mut saw_final = false;
        let mut partials_before_final = 0;
        loop {
            match tokio::time::timeout(Duration::from_millis(200), handle.recv())
                .await
                .unwrap()
            {
                Some(SttEvent::Transcript(e)) if e.stage == Stage::Partial => {
                    assert!(!saw_final, "no partial may follow a final for the same pass");
                    partials_before_final += 1;
                }
                Some(SttEvent::Transcript(e)) if e.stage == Stage::Final => {
                    assert_eq!(e.content, "hi");
                    saw_final = true;
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(partials_before_final, 2);
    }

    #[tokio::test]
    async fn two_sentence_boundary_emits_two_finals() {
        let driver = backend();
        let mut handle = driver
            .start_session("s1".into(), SttSessionConfig::default())
            .await
            .unwrap();
        handle.recv().await; // Ready
        handle.send_audio("你好\n今天天气怎么样\n".as_bytes().to_vec());

        let mut finals = Vec::new();
        while finals.len() < 2 {
            if let Some(SttEvent::Transcript(e)) = tokio::time::timeout(Duration::from_millis(200), handle.recv())
                .await
                .unwrap()
            {
                if e.stage == Stage::Final {
                    finals.push(e.content);
                }
            }
        }
        assert_eq!(finals, vec!["你好".to_string(), "今天天气怎么样".to_string()]);
    }

    #[tokio::test]
    async fn silence_frame_is_never_transcribed() {
        let driver = backend();
        let mut handle = driver
            .start_session("s1".into(), SttSessionConfig::default())
            .await
            .unwrap();
        handle.recv().await; // Ready
        handle.send_audio(vec![0u8; 3200]);
        handle.send_audio(b"ok\n".to_vec());

        loop {
            match tokio::time::timeout(Duration::from_millis(200), handle.recv())
                .await
                .unwrap()
                .unwrap()
            {
                SttEvent::Transcript(e) if e.stage == Stage::Final => {
                    assert_eq!(e.content, "ok");
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let driver = backend();
        let handle = driver
            .start_session("s1".into(), SttSessionConfig::default())
            .await
            .unwrap();
        handle.stop().await;
        handle.stop().await; // must not panic or hang
    }

    #[tokio::test]
    async fn send_audio_after_stop_is_silently_dropped() {
        let driver = backend();
        let handle = driver
            .start_session("s1".into(), SttSessionConfig::default())
            .await
            .unwrap();
        handle.stop().await;
        handle.send_audio(b"late\n".to_vec()); // must not panic
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_fires_once_per_interval_while_silent() {
        let mut cfg = SttDriverConfig::default();
        cfg.keepalive_interval_secs = 10;
        let driver = MockSttBackend::new(cfg);
        let mut handle = driver
            .start_session("s1".into(), SttSessionConfig::default())
            .await
            .unwrap();
        handle.recv().await; // Ready

        tokio::time::advance(Duration::from_secs(35)).await;

        let mut keepalives = 0;
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(50), handle.recv()).await {
            if matches!(event, SttEvent::KeepAliveInjected) {
                keepalives += 1;
            }
        }
        assert_eq!(keepalives, 3); // floor(35 / 10)
    }

    #[tokio::test]
    async fn transcribe_once_concatenates_finals() {
        let driver = backend();
        let text = driver
            .transcribe_once(b"hello\nworld\n", SttSessionConfig::default())
            .await
            .unwrap();
        assert_eq!(text, "hello world");
    }
}
