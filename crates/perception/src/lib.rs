//! Streaming perception: the STT driver (spec §4.1) and the trigger
//! policy (spec §4.3) that decides when a perception event is
//! "actionable" enough to invoke the LLM.

pub mod stt;
pub mod trigger;

pub use stt::{
    MockSttBackend, SttDriver, SttEvent, SttHandle, SttSessionConfig,
};
pub use trigger::{LlmJudgePolicy, RuleOnlyPolicy, TriggerPolicy};
