use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::perception::{Modality, PerceptionEvent};
use crate::tool::Message;

/// Lifecycle state of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Perceiving,
    Thinking,
    Acting,
    Completed,
    Failed,
    Cancelled,
}

/// One perceive→reason cycle recorded for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: u32,
    /// What caused this step to run (e.g. "final_audio_event", "text_input").
    pub trigger: String,
    /// The LLM's accumulated response text for this step, if any.
    pub thought: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(step_id: u32, trigger: impl Into<String>) -> Self {
        Self {
            step_id,
            trigger: trigger.into(),
            thought: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn finish(&mut self, thought: impl Into<String>) {
        self.thought = Some(thought.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> i64 {
        match self.finished_at {
            Some(end) => (end - self.started_at).num_milliseconds(),
            None => 0,
        }
    }
}

/// Context a task inherits — typically the session's prior conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContext {
    pub messages: Vec<Message>,
}

/// The outcome of a completed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub content: String,
    #[serde(default = "d_format")]
    pub format: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

fn d_format() -> String {
    "text".into()
}

/// The atomic unit of agent execution: an instruction plus whatever
/// perception accumulates against it before the agent reasons and replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub instruction: String,
    pub input_modalities: Vec<Modality>,
    pub status: TaskStatus,
    pub perception_buffer: Vec<PerceptionEvent>,
    pub steps: Vec<Step>,
    pub context: Option<TaskContext>,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(instruction: impl Into<String>, input_modalities: Vec<Modality>) -> Self {
        let now = Utc::now();
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            instruction: instruction.into(),
            input_modalities,
            status: TaskStatus::Pending,
            perception_buffer: Vec::new(),
            steps: Vec::new(),
            context: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_context(mut self, context: TaskContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn update_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn add_perception(&mut self, event: PerceptionEvent) {
        self.perception_buffer.push(event);
        self.updated_at = Utc::now();
    }

    pub fn add_step(&mut self, step: Step) {
        self.steps.push(step);
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self, result: TaskResult) {
        self.result = Some(result);
        self.status = TaskStatus::Completed;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.status = TaskStatus::Failed;
        self.updated_at = Utc::now();
    }

    /// Build the full message list for an LLM call: inherited context
    /// followed by one user message summarizing the perception buffer.
    pub fn get_messages(&self) -> Vec<Message> {
        let mut messages = Vec::new();
        if let Some(ctx) = &self.context {
            messages.extend(ctx.messages.clone());
        }
        let perception = self.format_perception();
        if !perception.is_empty() {
            messages.push(Message::user(perception));
        }
        messages
    }

    /// The (user, assistant) message pair this task contributes to its
    /// session's derived context, once completed. `None` for any task that
    /// has not reached [`TaskStatus::Completed`].
    pub fn turn_pair(&self) -> Option<(Message, Message)> {
        if self.status != TaskStatus::Completed {
            return None;
        }
        let result = self.result.as_ref()?;
        let perception = self.format_perception();
        let user_text = if perception.is_empty() {
            self.instruction.clone()
        } else {
            perception
        };
        Some((Message::user(user_text), Message::assistant(result.content.clone())))
    }

    fn format_perception(&self) -> String {
        self.perception_buffer
            .iter()
            .map(|event| match event.modality {
                Modality::Audio => format!("[speech] {}", event.content),
                Modality::Image => format!("[image] {}", event.content),
                Modality::Video => format!("[video] {}", event.content),
                Modality::Text => event.content.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::Stage;

    #[test]
    fn new_task_is_pending() {
        let t = Task::new("do something", vec![Modality::Text]);
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.perception_buffer.is_empty());
    }

    #[test]
    fn get_messages_formats_audio_perception() {
        let mut t = Task::new("listen", vec![Modality::Audio]);
        t.add_perception(PerceptionEvent::new(Modality::Audio, Stage::Final, "hello there"));
        let msgs = t.get_messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content.text().unwrap(), "[speech] hello there");
    }

    #[test]
    fn get_messages_prepends_inherited_context() {
        let mut t = Task::new("continue", vec![Modality::Text]);
        t.context = Some(TaskContext {
            messages: vec![Message::user("earlier question"), Message::assistant("earlier answer")],
        });
        t.add_perception(PerceptionEvent::new(Modality::Text, Stage::Final, "follow up"));
        let msgs = t.get_messages();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[2].content.text().unwrap(), "follow up");
    }

    #[test]
    fn complete_sets_status_and_result() {
        let mut t = Task::new("x", vec![]);
        t.complete(TaskResult {
            content: "done".into(),
            format: "text".into(),
            messages: vec![],
        });
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.result.unwrap().content, "done");
    }

    #[test]
    fn fail_sets_status_and_error() {
        let mut t = Task::new("x", vec![]);
        t.fail("boom");
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.error.as_deref(), Some("boom"));
    }

    #[test]
    fn step_duration_zero_when_unfinished() {
        let step = Step::new(1, "text_input");
        assert_eq!(step.duration_ms(), 0);
    }

    #[test]
    fn turn_pair_none_until_completed() {
        let mut t = Task::new("x", vec![Modality::Text]);
        t.add_perception(PerceptionEvent::new(Modality::Text, Stage::Final, "hi"));
        assert!(t.turn_pair().is_none());
        t.complete(TaskResult {
            content: "hello back".into(),
            format: "text".into(),
            messages: vec![],
        });
        let (user, assistant) = t.turn_pair().expect("completed task has a turn pair");
        assert_eq!(user.content.text().unwrap(), "hi");
        assert_eq!(assistant.content.text().unwrap(), "hello back");
    }
}
