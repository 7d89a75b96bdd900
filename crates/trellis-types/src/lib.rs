//! Shared domain types for Trellis.
//!
//! This crate contains the core domain types used across the Trellis
//! pipeline: the workflow model (steps, conditions, required inputs), the
//! action catalogue, model-client request/response shapes, execution
//! reports, configuration, and the pipeline error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, uuid,
//! chrono, thiserror, schemars, toml.

pub mod catalog;
pub mod condition;
pub mod config;
pub mod error;
pub mod execution;
pub mod llm;
pub mod workflow;
