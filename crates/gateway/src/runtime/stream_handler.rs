//! The bidirectional multimodal stream (spec §4.6): the hot path that
//! multiplexes inbound audio/control frames, a running STT session, and an
//! LLM worker turning finalized utterances into streamed replies.
//!
//! Per the cross-language redesign note in spec §9, the three cooperative
//! roles this used to need (a request reader, an STT relay, an LLM worker)
//! collapse to two tasks here: [`run`] itself is the un-spawned reader, which
//! already selects on the inbound frame channel, the STT event channel, and
//! cancellation in one loop — there is no separate relay task to write.
//! [`llm_worker`] is the one task actually spawned.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures_util::StreamExt;
use sa_domain::error::{Error, Result};
use sa_domain::perception::{Modality, PerceptionEvent, Stage};
use sa_domain::stream::StreamEvent;
use sa_domain::task::{Task, TaskContext, TaskResult, TaskStatus};
use sa_domain::tool::Message;
use sa_perception::{SttDriver, SttEvent, SttSessionConfig, TriggerPolicy};
use sa_protocol::{ClientFrame, CompleteMetadata, ControlCommand, InitialInput, ServerFrame, StreamConfig};
use sa_providers::{ChatRequest, LlmProvider};
use sa_sessions::SessionManager;
use tokio::sync::mpsc;

use crate::runtime::cancel::{CancelMap, CancelToken};
use crate::state::AppState;

/// Drive one bidirectional stream end to end: waits for the client's
/// `Start` frame, joins or creates the session it names, then multiplexes
/// inbound frames against the STT session and a spawned LLM worker until
/// the client ends the stream, cancels it, or disconnects.
///
/// `inbound`/`outbound` are transport-agnostic — the axum WebSocket handler
/// (`api::stream`) owns the socket and forwards parsed frames in, serialized
/// frames out.
pub async fn run(
    state: AppState,
    mut inbound: mpsc::Receiver<ClientFrame>,
    outbound: mpsc::Sender<ServerFrame>,
) {
    let (session_id, stream_cfg, initial_inputs) = match inbound.recv().await {
        Some(ClientFrame::Start {
            session_id,
            config,
            initial_inputs,
        }) => (session_id, config, initial_inputs),
        _ => {
            send_error(&outbound, &Error::Validation("expected a start frame".into())).await;
            return;
        }
    };

    let session = match resolve_session(&state.sessions, session_id) {
        Ok(session) => session,
        Err(e) => {
            send_error(&outbound, &e).await;
            return;
        }
    };
    let session_id = session.session_id.clone();

    let stt_cfg = build_stt_session_config(&session.config.stt, &stream_cfg);
    let mut stt_handle = match state.stt.start_session(session_id.clone(), stt_cfg).await {
        Ok(handle) => handle,
        Err(e) => {
            send_error(&outbound, &e).await;
            return;
        }
    };
    // Consume the driver's own Ready event before announcing ours — it is
    // purely an internal handshake, never forwarded to the client.
    let _ = stt_handle.recv().await;

    let llm = match state.llm.get(&session.config.llm.provider) {
        Some(provider) => provider,
        None => {
            send_error(
                &outbound,
                &Error::Config(format!("unknown LLM provider '{}'", session.config.llm.provider)),
            )
            .await;
            return;
        }
    };
    let llm_model = stream_cfg
        .llm_model
        .clone()
        .or_else(|| Some(session.config.llm.model.clone()));
    let system_message = stream_cfg
        .system_prompt
        .clone()
        .or_else(|| session.config.llm.system_message.clone());

    sa_domain::trace::TraceEvent::StreamOpened {
        session_id: session_id.clone(),
    }
    .emit();

    let _ = outbound
        .send(ServerFrame::Ready {
            session_id: session_id.clone(),
            message: "stream ready".into(),
        })
        .await;
    sa_domain::trace::TraceEvent::StreamFrameEnqueued {
        session_id: session_id.clone(),
        frame: "ready".into(),
    }
    .emit();

    let cancel = state.cancel_map.register(&session_id);
    let pending_capacity = state.config.streaming.pending_sentences_capacity;
    let (pending_tx, pending_rx) = mpsc::channel::<String>(pending_capacity);

    let worker = tokio::spawn(llm_worker(
        pending_rx,
        outbound.clone(),
        Arc::clone(&state.sessions),
        session_id.clone(),
        llm,
        llm_model,
        system_message,
        cancel.clone(),
    ));

    feed_initial_inputs(initial_inputs, &stt_handle, &pending_tx).await;

    let sink = stt_handle.sink();
    let cancelled = run_reader_loop(&mut inbound, &mut stt_handle, &sink, &outbound, &state.trigger, &pending_tx, &cancel)
        .await;

    if cancelled {
        worker.abort();
        drop(pending_tx);
        finish(&state.cancel_map, &session_id);
        sa_domain::trace::TraceEvent::StreamClosed {
            session_id: session_id.clone(),
            reason: "cancelled".into(),
        }
        .emit();
        return;
    }

    // The reader loop exits as soon as it observes END_AUDIO or a closed
    // inbound channel; drain whatever final transcript the preceding flush
    // produces before closing `pending_tx` so the worker sees it.
    let drain_deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while let Ok(Some(event)) = tokio::time::timeout_at(drain_deadline, stt_handle.recv()).await {
        handle_stt_event(event, &outbound, &state.trigger, &pending_tx).await;
    }
    drop(pending_tx);
    finish(&state.cancel_map, &session_id);

    let drain_timeout = Duration::from_secs(state.config.streaming.drain_timeout_secs);
    if tokio::time::timeout(drain_timeout, worker).await.is_err() {
        tracing::warn!(session_id = %session_id, "LLM worker drain timed out; abandoning turn in flight");
    }

    // The terminal frame on a normal close: every in-flight turn has either
    // completed (sentence_complete, above) or been abandoned by the drain
    // timeout, so the stream itself is now done.
    let _ = outbound
        .send(ServerFrame::Complete {
            finish_reason: "stop".into(),
            metadata: CompleteMetadata::default(),
        })
        .await;
    sa_domain::trace::TraceEvent::StreamClosed {
        session_id: session_id.clone(),
        reason: "end_audio".into(),
    }
    .emit();
}

fn finish(cancel_map: &CancelMap, session_id: &str) {
    cancel_map.remove(session_id);
}

/// The un-spawned reader role: multiplexes inbound client frames, STT
/// events, and the cancellation signal. Returns `true` if the stream ended
/// via cancellation (the caller must abort the worker rather than drain it).
async fn run_reader_loop(
    inbound: &mut mpsc::Receiver<ClientFrame>,
    stt_handle: &mut sa_perception::SttHandle,
    sink: &sa_perception::stt::AudioSink,
    outbound: &mpsc::Sender<ServerFrame>,
    trigger: &Arc<dyn TriggerPolicy>,
    pending_tx: &mpsc::Sender<String>,
    cancel: &CancelToken,
) -> bool {
    loop {
        tokio::select! {
            frame = inbound.recv() => {
                match frame {
                    Some(ClientFrame::Audio { data_base64 }) => {
                        if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(data_base64) {
                            sink.send_audio(bytes);
                        }
                    }
                    Some(ClientFrame::Control { command: ControlCommand::Flush }) => {
                        sink.flush().await;
                    }
                    Some(ClientFrame::Control { command: ControlCommand::EndAudio }) | None => {
                        sink.flush().await;
                        sink.stop().await;
                        return false;
                    }
                    Some(ClientFrame::Control { command: ControlCommand::Cancel }) => {
                        cancel.cancel();
                        sink.stop().await;
                        return true;
                    }
                    Some(ClientFrame::Start { .. }) => {
                        // A second Start on an already-running stream is not
                        // meaningful; ignore it rather than restart state.
                    }
                }
            }
            event = stt_handle.recv() => {
                handle_stt_event(event, outbound, trigger, pending_tx).await;
            }
            _ = cancel.cancelled() => {
                return true;
            }
        }
    }
}

async fn handle_stt_event(
    event: Option<SttEvent>,
    outbound: &mpsc::Sender<ServerFrame>,
    trigger: &Arc<dyn TriggerPolicy>,
    pending_tx: &mpsc::Sender<String>,
) {
    match event {
        None | Some(SttEvent::Ready { .. }) | Some(SttEvent::KeepAliveInjected) => {}
        Some(SttEvent::Transcript(ev)) => {
            let _ = outbound
                .send(ServerFrame::Stt {
                    text: ev.content.clone(),
                    is_final: ev.stage == Stage::Final,
                    confidence: ev.confidence,
                })
                .await;
            if ev.stage == Stage::Final {
                let probe = Task::new(ev.content.clone(), vec![Modality::Audio]);
                if trigger.should_invoke(&probe, &ev).await {
                    let _ = pending_tx.send(ev.content.clone()).await;
                }
            }
        }
    }
}

async fn feed_initial_inputs(
    inputs: Vec<InitialInput>,
    stt_handle: &sa_perception::SttHandle,
    pending_tx: &mpsc::Sender<String>,
) {
    for input in inputs {
        match input {
            InitialInput::Text(text) => {
                let _ = pending_tx.send(text.content).await;
            }
            InitialInput::Audio(audio) => {
                if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(audio.data_base64) {
                    stt_handle.send_audio(bytes);
                    stt_handle.flush().await;
                }
            }
        }
    }
}

/// The one spawned task: consumes finalized sentences one at a time (turn
/// atomicity, spec invariant #5) and streams each reply back as `Llm` delta
/// frames, committing the turn into the session only once the reply
/// completes in full (spec invariant #6). Keeps running while the channel
/// has pending sentences or has not yet been closed by the reader dropping
/// its sender — no separate "still running" flag needed.
#[allow(clippy::too_many_arguments)]
async fn llm_worker(
    mut pending_sentences: mpsc::Receiver<String>,
    outbound: mpsc::Sender<ServerFrame>,
    sessions: Arc<SessionManager>,
    session_id: String,
    llm: Arc<dyn LlmProvider>,
    llm_model: Option<String>,
    system_message: Option<String>,
    cancel: CancelToken,
) {
    while let Some(sentence) = pending_sentences.recv().await {
        if cancel.is_cancelled() {
            break;
        }
        if let Err(e) = run_turn(
            &sentence,
            &outbound,
            &sessions,
            &session_id,
            &llm,
            llm_model.clone(),
            system_message.clone(),
            &cancel,
        )
        .await
        {
            send_error(&outbound, &e).await;
        }
    }
}

async fn run_turn(
    sentence: &str,
    outbound: &mpsc::Sender<ServerFrame>,
    sessions: &Arc<SessionManager>,
    session_id: &str,
    llm: &Arc<dyn LlmProvider>,
    llm_model: Option<String>,
    system_message: Option<String>,
    cancel: &CancelToken,
) -> Result<()> {
    let started_at = std::time::Instant::now();
    let context = sessions
        .get(session_id)
        .map(|s| s.context())
        .unwrap_or_default();

    let mut task = Task::new(sentence, vec![Modality::Audio]).with_context(TaskContext { messages: context });
    task.update_status(TaskStatus::Perceiving);
    task.add_perception(PerceptionEvent::new(Modality::Audio, Stage::Final, sentence));
    task.update_status(TaskStatus::Thinking);

    sa_domain::trace::TraceEvent::TurnStarted {
        session_id: session_id.to_string(),
        task_id: task.task_id.clone(),
    }
    .emit();

    let mut messages = Vec::new();
    if let Some(sys) = &system_message {
        messages.push(Message::system(sys.clone()));
    }
    messages.extend(task.get_messages());

    let model_for_trace = llm_model.clone().unwrap_or_default();
    let req = ChatRequest {
        messages,
        model: llm_model,
        ..Default::default()
    };
    let mut stream = llm.chat_stream(req).await?;

    let mut content = String::new();
    let mut index: u32 = 0;
    loop {
        tokio::select! {
            next = stream.next() => {
                let Some(event) = next else { break };
                match event? {
                    StreamEvent::Token { text } => {
                        content.push_str(&text);
                        let _ = outbound.send(ServerFrame::Llm { delta: text, index }).await;
                        index += 1;
                    }
                    StreamEvent::Error { message } => {
                        return Err(Error::Provider { provider: llm.provider_id().to_string(), message });
                    }
                    _ => {}
                }
            }
            _ = cancel.cancelled() => {
                return Ok(());
            }
        }
    }

    task.complete(TaskResult {
        content: content.clone(),
        format: "text".into(),
        messages: vec![],
    });

    sessions.mutate(session_id, |session| {
        session.tasks.push(task.clone());
        session.stats.tasks_count += 1;
        session.stats.llm_requests += 1;
        session.touch();
    })?;

    let duration_ms = started_at.elapsed().as_millis() as u64;
    sa_domain::trace::TraceEvent::LlmRequest {
        provider: llm.provider_id().to_string(),
        model: model_for_trace,
        streaming: true,
        duration_ms,
        prompt_tokens: None,
        completion_tokens: None,
    }
    .emit();
    sa_domain::trace::TraceEvent::TurnCompleted {
        session_id: session_id.to_string(),
        task_id: task.task_id.clone(),
        finish_reason: "sentence_complete".into(),
        duration_ms,
    }
    .emit();

    // Each turn's completion is `sentence_complete`, not `stop` — a single
    // stream can drive many turns, and only the stream-terminal `Complete`
    // sent once by `run` after the drain loop uses `"stop"`.
    let _ = outbound
        .send(ServerFrame::Complete {
            finish_reason: "sentence_complete".into(),
            metadata: CompleteMetadata {
                transcribed_text: Some(sentence.to_string()),
                latency_ms: Some(started_at.elapsed().as_millis() as u64),
                ..Default::default()
            },
        })
        .await;

    Ok(())
}

/// Join an existing, active session by id, or mint a new anonymous one
/// scoped to this stream's lifetime when the client omits `session_id` on
/// its `Start` frame (spec §6 leaves this case open; a stream is a valid
/// standalone entry point, not only a continuation of a REST-created
/// session — see the Open Questions note in DESIGN.md).
fn resolve_session(
    sessions: &Arc<SessionManager>,
    session_id: Option<String>,
) -> Result<sa_sessions::Session> {
    match session_id {
        Some(id) => sessions
            .get_active(&id)
            .ok_or_else(|| Error::SessionNotFound(id)),
        None => sessions.create("stream", None, None),
    }
}

fn build_stt_session_config(
    defaults: &sa_domain::config::SessionSttConfig,
    overrides: &StreamConfig,
) -> SttSessionConfig {
    SttSessionConfig {
        model: overrides.stt_model.clone().unwrap_or_else(|| defaults.model.clone()),
        language: overrides.language.clone().unwrap_or_else(|| defaults.language.clone()),
        sample_rate: defaults.sample_rate,
        enable_punctuation: defaults.enable_punctuation,
        enable_itn: false,
        hotwords: None,
        max_sentence_silence_ms: 800,
        enable_words: false,
    }
}

async fn send_error(outbound: &mpsc::Sender<ServerFrame>, error: &Error) {
    let _ = outbound
        .send(ServerFrame::Error {
            code: error.code(),
            message: error.to_string(),
            recoverable: matches!(error, Error::Recoverable(_)),
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::capability::LlmCapabilities;
    use sa_domain::config::{Config as SaConfig, SessionManagerConfig, SttDriverConfig};
    use sa_domain::stream::BoxStream;
    use sa_perception::{MockSttBackend, RuleOnlyPolicy};
    use sa_providers::ChatResponse;

    struct EchoProvider;

    #[async_trait::async_trait]
    impl LlmProvider for EchoProvider {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse {
                content: req.messages.last().map(|m| m.content.extract_all_text()).unwrap_or_default(),
                tool_calls: vec![],
                usage: None,
                model: "echo".into(),
                finish_reason: Some("stop".into()),
            })
        }

        async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            let text = req.messages.last().map(|m| m.content.extract_all_text()).unwrap_or_default();
            let tokens: Vec<String> = text.split_whitespace().map(|s| format!("{s} ")).collect();
            Ok(Box::pin(futures_util::stream::iter(
                tokens.into_iter().map(|t| Ok(StreamEvent::Token { text: t })),
            )))
        }

        fn capabilities(&self) -> &LlmCapabilities {
            static CAPS: std::sync::OnceLock<LlmCapabilities> = std::sync::OnceLock::new();
            CAPS.get_or_init(LlmCapabilities::default)
        }

        fn provider_id(&self) -> &str {
            "echo"
        }
    }

    fn test_state() -> AppState {
        AppState {
            config: Arc::new(SaConfig::default()),
            llm: Arc::new({
                // ProviderRegistry has no direct "insert" constructor; tests
                // exercise run_turn / the reader loop directly instead of
                // going through AppState.llm for the echo provider.
                sa_providers::registry::ProviderRegistry::from_config(&Default::default()).unwrap()
            }),
            sessions: SessionManager::new(SessionManagerConfig::default()),
            stt: Arc::new(MockSttBackend::new(SttDriverConfig::default())),
            trigger: Arc::new(RuleOnlyPolicy),
            cancel_map: Arc::new(CancelMap::new()),
            api_token_hash: None,
        }
    }

    #[tokio::test]
    async fn run_turn_streams_deltas_and_commits_session_history() {
        let state = test_state();
        let session = state.sessions.create("client-1", None, None).unwrap();
        let llm: Arc<dyn LlmProvider> = Arc::new(EchoProvider);
        let (tx, mut rx) = mpsc::channel(32);
        let cancel = CancelToken::new();

        run_turn(
            "hello there",
            &tx,
            &state.sessions,
            &session.session_id,
            &llm,
            None,
            None,
            &cancel,
        )
        .await
        .unwrap();
        drop(tx);

        let mut deltas = String::new();
        let mut saw_complete = false;
        while let Some(frame) = rx.recv().await {
            match frame {
                ServerFrame::Llm { delta, .. } => deltas.push_str(&delta),
                ServerFrame::Complete { .. } => saw_complete = true,
                _ => {}
            }
        }
        assert_eq!(deltas.trim(), "hello there");
        assert!(saw_complete);

        let updated = state.sessions.get(&session.session_id).unwrap();
        let ctx = updated.context();
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx[0].content.text().unwrap(), "hello there");
    }

    #[tokio::test]
    async fn cancelled_turn_does_not_commit_to_session() {
        let state = test_state();
        let session = state.sessions.create("client-1", None, None).unwrap();
        let llm: Arc<dyn LlmProvider> = Arc::new(EchoProvider);
        let (tx, _rx) = mpsc::channel(32);
        let cancel = CancelToken::new();
        cancel.cancel();

        run_turn(
            "never committed",
            &tx,
            &state.sessions,
            &session.session_id,
            &llm,
            None,
            None,
            &cancel,
        )
        .await
        .unwrap();

        let updated = state.sessions.get(&session.session_id).unwrap();
        assert!(updated.context().is_empty());
    }

    #[tokio::test]
    async fn resolve_session_errors_on_unknown_id() {
        let state = test_state();
        let err = resolve_session(&state.sessions, Some("ghost".into())).unwrap_err();
        assert_eq!(err.code(), 1003);
    }

    #[tokio::test]
    async fn resolve_session_creates_anonymous_session_when_omitted() {
        let state = test_state();
        let session = resolve_session(&state.sessions, None).unwrap();
        assert_eq!(session.client_id, "stream");
    }
}
