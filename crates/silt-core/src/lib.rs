//! silt-core: background derived-state consolidators for a work tracker.
//!
//! Three consolidators maintain bounded, reconciled, eventually-consistent
//! secondary state from primary mutable documents: version history
//! ([`history`]), extracted cross-references ([`reconcile`]), and a capped
//! recently-visited index ([`recency`]). All three are driven by an
//! external at-least-once task queue through [`tasks`] and must tolerate
//! redelivery of identical arguments.
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` with `.context(...)` at fallible call
//!   sites; failure classification happens once, at the task boundary.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `error!`, `debug!`,
//!   `trace!`) with structured fields.

pub mod cache;
pub mod config;
pub mod db;
pub mod extract;
pub mod history;
pub mod model;
pub mod recency;
pub mod reconcile;
pub mod tasks;
