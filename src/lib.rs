//! Orchestrator Core: a resilient orchestration substrate for
//! autonomous agent platforms.
//!
//! Nine subsystems in dependency order -- Immutable Log, Message Bus,
//! Clarity Kernel, Verification Framework, Unified Logic, Intent
//! Governance Router, Watchdogs & Safeguards, Control Plane, Boot
//! Pipeline -- wired together by [`runtime::Runtime`].

pub mod domain;
pub mod infrastructure;
pub mod runtime;
pub mod services;
pub mod watchdogs;

pub use domain::OrchestratorError;
pub use runtime::Runtime;
