// src/core/tasks/mod.rs

//! This module contains all long-running background tasks that keep the
//! provider cache populated and tidy.

pub mod caching_agent;
pub mod expiry;
