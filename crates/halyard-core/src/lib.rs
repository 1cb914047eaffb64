//! Loop detection, per-turn tool scheduling, and configuration.

pub mod config;
pub mod loop_guard;
pub mod scheduler;

pub use config::Config;
pub use loop_guard::{GenerationEvent, LoopGuard};
pub use scheduler::{Approver, CallResult, FixedApprover, FunctionCall, TurnOutcome, TurnScheduler};
