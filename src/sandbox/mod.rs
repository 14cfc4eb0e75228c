// src/sandbox/mod.rs
// Subprocess execution: bounded runner + optional container isolation

pub mod runner;
pub mod sessions;

pub use runner::{RunOutcome, RunSpec, SandboxMode, SandboxRunner};
pub use sessions::{SandboxSession, SessionTracker};
