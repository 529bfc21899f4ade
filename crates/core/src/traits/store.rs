use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{RuleSet, StepRecord, UsageRecord, WorkflowExecution};

/// Append-only persistence for usage records.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Insert a record. Records are facts; there is no update or delete.
    async fn insert(&self, record: &UsageRecord) -> Result<()>;

    /// Records for one user within a time range.
    async fn by_user(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>>;

    /// Records for one model within a time range.
    async fn by_model(
        &self,
        model_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>>;

    /// All records within a time range.
    async fn all(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<UsageRecord>>;
}

/// Durable persistence for rule sets.
#[async_trait]
pub trait RuleSetStore: Send + Sync {
    async fn insert(&self, rule_set: &RuleSet) -> Result<()>;

    async fn get(&self, rule_set_id: &str) -> Result<Option<RuleSet>>;

    /// List rule sets, optionally filtered by creator.
    async fn list(&self, created_by: Option<&str>) -> Result<Vec<RuleSet>>;

    async fn update(&self, rule_set: &RuleSet) -> Result<()>;

    async fn delete(&self, rule_set_id: &str) -> Result<()>;

    /// Atomically bump the usage counter and last-used timestamp.
    async fn increment_usage(&self, rule_set_id: &str) -> Result<()>;
}

/// Persistence for workflow executions and their step logs.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn save(&self, execution: &WorkflowExecution) -> Result<()>;

    async fn load(&self, execution_id: &str) -> Result<Option<WorkflowExecution>>;

    /// Append one step to an execution's log.
    async fn append_step(&self, execution_id: &str, step: &StepRecord) -> Result<()>;

    /// Ids of executions currently in a non-terminal status.
    async fn list_active(&self) -> Result<Vec<String>>;
}
