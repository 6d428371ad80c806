//! WireTuner Conversion Worker Library
//!
//! Asynchronous document conversion: clients submit a job, poll its status,
//! and download the artifact once it has succeeded. Finished jobs and their
//! files are reclaimed by a retention reaper.
//!
//! ## Module Overview
//!
//! - `engine`: the [`engine::JobEngine`] facade that ties everything together
//! - `job`: job record and lifecycle transitions
//! - `store`: in-memory job store
//! - `queue`: bounded FIFO of pending jobs
//! - `worker`: fixed-size worker pool with timeout and cancellation
//! - `converter`: converter trait, registry and the SVG to PDF converter
//! - `artifact`: atomic artifact writes and path containment
//! - `reaper`: TTL cleanup of records and files
//! - `metrics`: counters and the admin metrics snapshot
//! - `api`: axum HTTP surface
//! - `telemetry`: tracing and OpenTelemetry setup
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use worker_convert::{
//!     config::EngineConfig,
//!     converter::{ConversionRequest, ConverterRegistry},
//!     engine::JobEngine,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = JobEngine::start(
//!         EngineConfig::new("/tmp/worker-convert"),
//!         ConverterRegistry::with_builtin(),
//!     )?;
//!
//!     let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10"/>"#;
//!     let id = engine.submit(
//!         ConversionRequest::new("svg-to-pdf").with_input("drawing.svg", svg),
//!     )?;
//!
//!     println!("{:?}", engine.status(&id)?.status);
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod artifact;
pub mod config;
pub mod converter;
pub mod engine;
pub mod error;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod reaper;
pub mod store;
pub mod telemetry;
pub mod worker;
