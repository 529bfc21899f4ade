#![deny(unused)]
//! Core types, traits, and error definitions for Modelflow.
//!
//! This crate provides the foundational building blocks shared across the
//! orchestration, rule, workflow, and usage layers of the system.

pub mod config;
pub mod error;
pub mod events;
pub mod mocks;
pub mod template;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use events::*;
pub use traits::*;
pub use types::*;
