// src/core/state/mod.rs

//! Defines the central `EngineState` struct and its supporting state.

mod core;
mod stats;

pub use self::core::{EngineState, LogReloadHandle, ScheduledAgent};
pub use self::stats::{AgentStats, AgentStatus};
