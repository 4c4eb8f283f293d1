//! The non-streaming orchestrator (spec §4.5): drives one [`Task`] through
//! perceive → trigger → reason for the unary `Process` RPC and the unary
//! Chat REST endpoint. The bidirectional hot path has its own driver — see
//! [`crate::runtime::stream_handler`].

use std::sync::Arc;

use futures_util::StreamExt;
use sa_domain::error::{Error, Result};
use sa_domain::perception::{Modality, PerceptionEvent, Stage};
use sa_domain::stream::StreamEvent;
use sa_domain::task::{Step, Task, TaskResult, TaskStatus};
use sa_domain::tool::Message;
use sa_perception::{SttDriver, SttSessionConfig, TriggerPolicy};
use sa_providers::{ChatRequest, LlmProvider};
use tokio::sync::mpsc;

/// One event yielded while a task is driven through the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    Perception(PerceptionEvent),
    /// One LLM token delta.
    Thinking(String),
    Completed(TaskResult),
    Failed(String),
}

/// The closed set of inputs a single orchestrator call may carry. Exactly
/// one of `audio`/`text` is consulted, selected by the task's declared
/// `input_modalities` (audio takes priority when both are present, mirroring
/// spec §4.5's "if AUDIO ... if TEXT ..." ordering).
#[derive(Debug, Clone, Default)]
pub struct OrchestratorInput {
    pub text: Option<String>,
    pub audio: Option<Vec<u8>>,
}

/// Drive `task` to completion, returning a stream of the perception/
/// thinking/terminal events produced along the way. The work runs on a
/// spawned task so the returned stream is purely a channel drain — this
/// sidesteps the restriction that `async_stream`'s `yield` can only appear
/// directly inside the macro body, not inside a called-out async fn.
pub fn run_task(
    task: Task,
    system_message: Option<String>,
    input: OrchestratorInput,
    stt: Arc<dyn SttDriver>,
    stt_cfg: SttSessionConfig,
    llm: Arc<dyn LlmProvider>,
    llm_model: Option<String>,
    trigger: Arc<dyn TriggerPolicy>,
) -> impl futures_core::Stream<Item = OrchestratorEvent> {
    let (tx, mut rx) = mpsc::channel::<OrchestratorEvent>(64);
    tokio::spawn(drive_task(
        task,
        system_message,
        input,
        stt,
        stt_cfg,
        llm,
        llm_model,
        trigger,
        tx,
    ));
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield event;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive_task(
    mut task: Task,
    system_message: Option<String>,
    input: OrchestratorInput,
    stt: Arc<dyn SttDriver>,
    stt_cfg: SttSessionConfig,
    llm: Arc<dyn LlmProvider>,
    llm_model: Option<String>,
    trigger: Arc<dyn TriggerPolicy>,
    tx: mpsc::Sender<OrchestratorEvent>,
) {
    task.update_status(TaskStatus::Perceiving);
    let has_audio = task.input_modalities.contains(&Modality::Audio);
    let has_text = task.input_modalities.contains(&Modality::Text);

    let outcome: Result<()> = async {
        if has_audio {
            if let Some(audio) = &input.audio {
                let text = stt.transcribe_once(audio, stt_cfg).await?;
                let event = PerceptionEvent::new(Modality::Audio, Stage::Final, text);
                let _ = tx.send(OrchestratorEvent::Perception(event.clone())).await;
                task.add_perception(event.clone());
                if trigger.should_invoke(&task, &event).await {
                    run_thinking_pass(&mut task, &llm, llm_model.clone(), system_message.clone(), &tx).await?;
                }
            }
        } else if has_text {
            let event = PerceptionEvent::new(Modality::Text, Stage::Final, input.text.unwrap_or_default());
            let _ = tx.send(OrchestratorEvent::Perception(event.clone())).await;
            task.add_perception(event.clone());
            if trigger.should_invoke(&task, &event).await {
                run_thinking_pass(&mut task, &llm, llm_model.clone(), system_message.clone(), &tx).await?;
            }
        } else {
            run_thinking_pass(&mut task, &llm, llm_model.clone(), system_message.clone(), &tx).await?;
        }
        Ok(())
    }
    .await;

    if let Err(e) = outcome {
        task.fail(e.to_string());
        let _ = tx.send(OrchestratorEvent::Failed(e.to_string())).await;
    }
}

/// PERCEIVING → THINKING → COMPLETED → back to PERCEIVING, per spec §4.5.
/// `task.result` is treated as "most recent completed pass" rather than a
/// strict write-once terminal value, since a single task can cycle through
/// this pass more than once while the underlying stream is still open (the
/// spec calls this out explicitly: status is monotonic "except for the
/// PERCEIVING↔THINKING cycle inside one streaming task").
async fn run_thinking_pass(
    task: &mut Task,
    llm: &Arc<dyn LlmProvider>,
    model: Option<String>,
    system_message: Option<String>,
    tx: &mpsc::Sender<OrchestratorEvent>,
) -> Result<()> {
    task.update_status(TaskStatus::Thinking);

    let mut messages = Vec::new();
    if let Some(sys) = &system_message {
        messages.push(Message::system(sys.clone()));
    }
    messages.extend(task.get_messages());

    let req = ChatRequest {
        messages,
        model,
        ..Default::default()
    };
    let mut stream = llm.chat_stream(req).await?;
    let mut content = String::new();
    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Token { text } => {
                content.push_str(&text);
                let _ = tx.send(OrchestratorEvent::Thinking(text)).await;
            }
            StreamEvent::Error { message } => {
                return Err(Error::Provider {
                    provider: llm.provider_id().to_string(),
                    message,
                });
            }
            _ => {}
        }
    }

    let mut step = Step::new(task.steps.len() as u32 + 1, "final_event");
    step.finish(content.clone());
    task.add_step(step);
    task.complete(TaskResult {
        content,
        format: "text".into(),
        messages: vec![],
    });
    task.perception_buffer.clear();
    task.update_status(TaskStatus::Perceiving);

    let _ = tx
        .send(OrchestratorEvent::Completed(task.result.clone().expect("just completed")))
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::capability::LlmCapabilities;
    use sa_domain::config::SttDriverConfig;
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
            Ok(Box::pin(futures_util::stream::iter(tokens.into_iter().map(|t| {
                Ok(StreamEvent::Token { text: t })
            }))))
        }

        fn capabilities(&self) -> &LlmCapabilities {
            static CAPS: std::sync::OnceLock<LlmCapabilities> = std::sync::OnceLock::new();
            CAPS.get_or_init(LlmCapabilities::default)
        }

        fn provider_id(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn text_only_task_completes_with_echoed_content() {
        let task = Task::new("hello", vec![Modality::Text]);
        let stream = run_task(
            task,
            None,
            OrchestratorInput {
                text: Some("hello there".into()),
                audio: None,
            },
            Arc::new(MockSttBackend::new(SttDriverConfig::default())),
            SttSessionConfig::default(),
            Arc::new(EchoProvider),
            None,
            Arc::new(RuleOnlyPolicy),
        );
        tokio::pin!(stream);
        let mut completed = None;
        while let Some(event) = stream.next().await {
            if let OrchestratorEvent::Completed(result) = event {
                completed = Some(result);
            }
        }
        assert_eq!(completed.unwrap().content.trim(), "hello there");
    }

    #[tokio::test]
    async fn no_modality_task_invokes_llm_directly() {
        let task = Task::new("ambient", vec![]);
        let stream = run_task(
            task,
            Some("you are a bot".into()),
            OrchestratorInput::default(),
            Arc::new(MockSttBackend::new(SttDriverConfig::default())),
            SttSessionConfig::default(),
            Arc::new(EchoProvider),
            None,
            Arc::new(RuleOnlyPolicy),
        );
        tokio::pin!(stream);
        let mut saw_completed = false;
        while let Some(event) = stream.next().await {
            if matches!(event, OrchestratorEvent::Completed(_)) {
                saw_completed = true;
            }
        }
        assert!(saw_completed);
    }
}
