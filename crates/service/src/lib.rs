#![deny(unused)]
//! Generation pipeline for Modelflow.
//!
//! Composes the rule engine, model registry, pricing, semantic retrieval,
//! and the usage ledger into the end-to-end request flow that the API layer
//! and the workflow executor both call.

pub mod pipeline;

pub use pipeline::GenerationPipeline;
