//! Lead Scoring Library
//!
//! This library provides the core of the lead scoring service: registry
//! adapters behind proxy rotation and captcha solving, per-lead enrichment,
//! the scoring engine, and the batch runner with its run state machine.
//!
//! # Modules
//!
//! - `api`: API definitions.
//! - `core`: Core business logic.
//! - `integrations`: External service integrations.
//! - `captcha`: Captcha solving service client.
//! - `config`: Configuration management.
//! - `enrichment`: Per-lead enrichment orchestration.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `models`: Core data models.
//! - `proxy_pool`: Outbound proxy rotation.
//! - `registry_client`: Shared HTTP plumbing for registry adapters.
//! - `run_state`: Scoring run lifecycle.
//! - `runner`: Batch driver.
//! - `scoring`: Scoring rules and group classification.
//! - `sink`: Result sink.
//! - `sources`: Registry adapters.

pub mod api;
pub mod core;
pub mod integrations;

// Re-export primary modules for shared use in tests and other binaries
pub mod captcha;
pub mod config;
pub mod enrichment;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod proxy_pool;
pub mod registry_client;
pub mod run_state;
pub mod runner;
pub mod scoring;
pub mod sink;
pub mod sources;
