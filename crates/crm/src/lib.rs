#![deny(unused)]
//! CRM collaborator client for Modelflow.
//!
//! Thin HTTP client over the external CRM service: leads, messages,
//! interactions, and workflow definitions.

pub mod client;

pub use client::HttpCrmClient;
