//! The trigger policy (spec §4.3): the predicate deciding whether a
//! perception event is actionable enough to spawn an LLM call.

use async_trait::async_trait;
use sa_domain::perception::{Modality, PerceptionEvent, Stage};
use sa_domain::task::Task;
use sa_domain::tool::Message;
use sa_providers::{ChatRequest, LlmProvider};
use std::sync::Arc;

/// `should_invoke(task, event) -> bool` (spec §4.3).
#[async_trait]
pub trait TriggerPolicy: Send + Sync {
    async fn should_invoke(&self, task: &Task, event: &PerceptionEvent) -> bool;
}

/// Evaluates the five ordered rules in spec §4.3 with no LLM call:
/// TEXT/FINAL and IMAGE/FINAL always trigger; AUDIO/FINAL triggers iff its
/// trimmed content is non-empty; everything else (including any ERROR
/// stage) does not.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleOnlyPolicy;

#[async_trait]
impl TriggerPolicy for RuleOnlyPolicy {
    async fn should_invoke(&self, task: &Task, event: &PerceptionEvent) -> bool {
        let invoked = rule_only(event);
        emit_decision(task, event, invoked);
        invoked
    }
}

fn emit_decision(task: &Task, event: &PerceptionEvent, invoked: bool) {
    sa_domain::trace::TraceEvent::TriggerDecision {
        task_id: task.task_id.clone(),
        modality: format!("{:?}", event.modality),
        stage: format!("{:?}", event.stage),
        invoked,
    }
    .emit();
}

fn rule_only(event: &PerceptionEvent) -> bool {
    if event.stage == Stage::Error {
        return false;
    }
    match (event.modality, event.stage) {
        (Modality::Text, Stage::Final) => true,
        (Modality::Audio, Stage::Final) => !event.content.trim().is_empty(),
        (Modality::Image, Stage::Final) => true,
        _ => false,
    }
}

/// Defers AUDIO/FINAL events to an LLM judge call ("is this a complete,
/// actionable utterance? YES/NO"), falling back to [`RuleOnlyPolicy`] if the
/// judge call fails. TEXT/FINAL and IMAGE/FINAL still trigger unconditionally
/// — only the audio rule is judged.
pub struct LlmJudgePolicy {
    provider: Arc<dyn LlmProvider>,
    model: Option<String>,
    fallback: RuleOnlyPolicy,
}

impl LlmJudgePolicy {
    pub fn new(provider: Arc<dyn LlmProvider>, model: Option<String>) -> Self {
        Self {
            provider,
            model,
            fallback: RuleOnlyPolicy,
        }
    }

    async fn ask_judge(&self, event: &PerceptionEvent) -> Option<bool> {
        let req = ChatRequest {
            messages: vec![
                Message::system("Reply with exactly one word: YES or NO."),
                Message::user(format!(
                    "Is the following a complete, actionable utterance?\n\n{}",
                    event.content
                )),
            ],
            model: self.model.clone(),
            max_tokens: Some(4),
            temperature: Some(0.0),
            ..Default::default()
        };
        let resp = self.provider.chat(req).await.ok()?;
        Some(resp.content.trim().to_ascii_uppercase().starts_with("YES"))
    }
}

#[async_trait]
impl TriggerPolicy for LlmJudgePolicy {
    async fn should_invoke(&self, task: &Task, event: &PerceptionEvent) -> bool {
        if event.stage == Stage::Error {
            emit_decision(task, event, false);
            return false;
        }
        let invoked = match (event.modality, event.stage) {
            (Modality::Text, Stage::Final) => true,
            (Modality::Image, Stage::Final) => true,
            (Modality::Audio, Stage::Final) => match self.ask_judge(event).await {
                Some(verdict) => verdict,
                // The fallback already emits its own TriggerDecision; don't
                // double-emit for the judged case.
                None => return self.fallback.should_invoke(task, event).await,
            },
            _ => false,
        };
        emit_decision(task, event, invoked);
        invoked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::capability::LlmCapabilities;
    use sa_domain::error::Result as SaResult;
    use sa_domain::stream::{BoxStream, StreamEvent};
    use sa_providers::ChatResponse;

    fn event(modality: Modality, stage: Stage, content: &str) -> PerceptionEvent {
        PerceptionEvent::new(modality, stage, content)
    }

    fn task() -> Task {
        Task::new("x", vec![Modality::Audio])
    }

    #[tokio::test]
    async fn error_stage_never_triggers() {
        let policy = RuleOnlyPolicy;
        let e = event(Modality::Text, Stage::Error, "oops");
        assert!(!policy.should_invoke(&task(), &e).await);
    }

    #[tokio::test]
    async fn text_final_always_triggers() {
        let policy = RuleOnlyPolicy;
        let e = event(Modality::Text, Stage::Final, "hello");
        assert!(policy.should_invoke(&task(), &e).await);
    }

    #[tokio::test]
    async fn text_partial_never_triggers() {
        let policy = RuleOnlyPolicy;
        let e = event(Modality::Text, Stage::Partial, "hel");
        assert!(!policy.should_invoke(&task(), &e).await);
    }

    #[tokio::test]
    async fn audio_final_triggers_only_when_nonempty() {
        let policy = RuleOnlyPolicy;
        assert!(
            policy
                .should_invoke(&task(), &event(Modality::Audio, Stage::Final, "hi"))
                .await
        );
        assert!(
            !policy
                .should_invoke(&task(), &event(Modality::Audio, Stage::Final, "   "))
                .await
        );
    }

    #[tokio::test]
    async fn image_final_always_triggers() {
        let policy = RuleOnlyPolicy;
        let e = event(Modality::Image, Stage::Final, "a cat");
        assert!(policy.should_invoke(&task(), &e).await);
    }

    struct StubProvider {
        answer: String,
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        async fn chat(&self, _req: ChatRequest) -> SaResult<ChatResponse> {
            Ok(ChatResponse {
                content: self.answer.clone(),
                tool_calls: vec![],
                usage: None,
                model: "stub".into(),
                finish_reason: Some("stop".into()),
            })
        }

        async fn chat_stream(&self, _req: ChatRequest) -> SaResult<BoxStream<'static, SaResult<StreamEvent>>> {
            unimplemented!("not exercised by trigger policy tests")
        }

        fn capabilities(&self) -> &LlmCapabilities {
            static CAPS: std::sync::OnceLock<LlmCapabilities> = std::sync::OnceLock::new();
            CAPS.get_or_init(LlmCapabilities::default)
        }

        fn provider_id(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn llm_judge_triggers_on_yes() {
        let provider = Arc::new(StubProvider { answer: "YES".into() });
        let policy = LlmJudgePolicy::new(provider, None);
        let e = event(Modality::Audio, Stage::Final, "turn off the lights");
        assert!(policy.should_invoke(&task(), &e).await);
    }

    #[tokio::test]
    async fn llm_judge_does_not_trigger_on_no() {
        let provider = Arc::new(StubProvider { answer: "NO".into() });
        let policy = LlmJudgePolicy::new(provider, None);
        let e = event(Modality::Audio, Stage::Final, "um so");
        assert!(!policy.should_invoke(&task(), &e).await);
    }
}
