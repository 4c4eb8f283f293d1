//! The parts of the gateway that keep work running after the request that
//! started it has returned: the single-turn orchestrator, the bidirectional
//! multimodal stream handler, and per-stream cancellation.

pub mod cancel;
pub mod orchestrator;
pub mod stream_handler;
