#![deny(unused)]
//! Workflow Executor for Modelflow.
//!
//! Runs statically-declared directed graphs of typed nodes over a shared
//! mutable state, one active node at a time per execution:
//! - Arena-style graph construction and validation
//! - A safe, explicitly-scoped condition expression evaluator
//! - Human-approval suspension with external re-entry
//! - Specialized AI agents for CRM automation steps

pub mod agents;
pub mod approval;
pub mod executor;
pub mod expr;
pub mod graph;

pub use agents::{AgentDispatcher, AgentSet};
pub use approval::ApprovalRegistry;
pub use executor::WorkflowExecutor;
pub use graph::{Edge, WorkflowGraph};
