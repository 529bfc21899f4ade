#![deny(unused)]
//! Usage Ledger for Modelflow.
//!
//! Tracks token consumption and cost as append-only facts and answers
//! usage queries by user, model, and time range.

pub mod ledger;

pub use ledger::UsageLedger;
