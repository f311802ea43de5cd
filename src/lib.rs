//! # stimgen Core Library
//!
//! This crate drives multiple signal-generation/acquisition cards in lock-step:
//! each card outputs a configurable multi-channel sine stimulus while sampling
//! the mirrored analog inputs to compute live signal statistics and feed a
//! waveform viewer. The library holds all of the engine logic; the CLI binary
//! (`main.rs`) is a thin demo shell over a simulated chassis, and a native GUI
//! front end can sit on the same [`app::StimApp`] boundary.
//!
//! ## Crate Structure
//!
//! The library is organized into several modules, each with a distinct
//! responsibility:
//!
//! - **`app`**: The `StimApp` hub wiring configuration, registry, scope
//!   buffers, and engine together, and exposing the presentation boundary
//!   (read-only snapshot queries plus mutating commands).
//! - **`advisor`**: Pure sample-rate selection: maps a requested output
//!   frequency to a hardware-legal sample rate and a quality grade.
//! - **`config`**: Strongly-typed configuration loading (TOML file plus
//!   environment overrides) and semantic validation. See [`config::StimConfig`].
//! - **`engine`**: The acquisition engine — per-card session provisioning,
//!   the continuous output+monitoring loop, and fault isolation.
//! - **`error`**: The custom `StimError` enum for centralized error handling.
//! - **`frequency`**: Loader for the tabular frequency list consumed by the
//!   front end's frequency selector.
//! - **`hardware`**: Capability traits for the underlying driver (output and
//!   input tasks), the per-card session pairing, and a simulated chassis for
//!   tests and demos.
//! - **`measurement`**: Per-batch RMS/peak statistics and the clipping
//!   predicate used by the display layer.
//! - **`registry`**: The shared, lock-protected table of per-channel
//!   configuration and live measurements.
//! - **`scope`**: Bounded waveform ring buffers feeding the plot widget.
//! - **`telemetry`**: Structured logging setup built on `tracing`.
//! - **`waveform`**: Seamless sine buffer synthesis for continuous
//!   regenerating output.

pub mod advisor;
pub mod app;
pub mod config;
pub mod engine;
pub mod error;
pub mod frequency;
pub mod hardware;
pub mod measurement;
pub mod registry;
pub mod scope;
pub mod telemetry;
pub mod waveform;
