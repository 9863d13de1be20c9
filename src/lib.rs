//! hwgauge — local hardware usage sampling for Linux hosts.
//!
//! Provides:
//! - `bootstrap` — one-shot host environment detection (proc root,
//!   cpufreq path, kernel constants)
//! - `collector` — the sampling engines: CPU usage/frequency/name,
//!   temperature sensors, memory and mounts
//! - `model` — serializable snapshot types produced by the engines
//!
//! Engines read through the [`collector::FileSystem`] seam so tests run
//! against in-memory fixtures instead of a live `/proc`.

pub mod bootstrap;
pub mod collector;
pub mod model;
