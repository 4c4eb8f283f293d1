//! Session & Session Manager (spec §4.4): long-lived, multi-turn
//! conversations with bounded admission, absolute TTL expiry, and a
//! periodic background sweep.

mod manager;
mod session;

pub use manager::SessionManager;
pub use session::{Session, SessionStats, SessionStatus};
