#![deny(unused)]
//! Rule Engine for Modelflow.
//!
//! Evaluates conditions against requests/responses and applies
//! transformation actions around the generation pipeline:
//! - Deterministic, priority-ordered rule application per phase
//! - Rule-set CRUD with a write-through in-memory cache
//! - Validation of rule definitions at create/update time

pub mod action;
pub mod condition;
pub mod engine;
pub mod validate;

pub use action::{apply_input_action, apply_output_action};
pub use condition::check_condition;
pub use engine::RuleEngine;
pub use validate::validate_rule;
