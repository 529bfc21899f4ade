//! Trait contracts for Modelflow.
//!
//! These traits define the seams between the orchestration core and its
//! collaborators: provider adapters, persistent stores, the CRM service,
//! the event channel, and semantic retrieval.

pub mod crm;
pub mod events;
pub mod provider;
pub mod retrieval;
pub mod store;

pub use crm::*;
pub use events::*;
pub use provider::*;
pub use retrieval::*;
pub use store::*;
