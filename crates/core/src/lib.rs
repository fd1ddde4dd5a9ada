//! Olimpiada core library.
//!
//! This crate provides the competition lifecycle orchestrator for a yearly
//! olympiad cycle (gestión): schedule allocation for global phases, phase
//! and role permission matrices, the sub-phase state machine, the access
//! gate, configuration, and SQLite persistence.

pub mod calendar;
pub mod carry_over;
pub mod config;
pub mod db;
pub mod errors;
pub mod gate;
pub mod models;
pub mod orchestrator;
pub mod permissions;
pub mod schedule;
pub mod subphase;

// Re-exports for convenience.
pub use calendar::{Clock, FixedClock, SystemClock};
pub use config::AppConfig;
pub use db::Database;
pub use errors::CoreError;
pub use gate::{AccessGate, CycleSnapshot, GateDecision, RouteSpec};
pub use orchestrator::Orchestrator;
