//! Orchestration over the diagnostics model and remediation handlers

pub mod engine;
pub mod envelope;

pub use engine::DiagnosticsEngine;
