//! In-memory store implementations using DashMap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;

use modelflow_core::{
    events::EventEnvelope,
    traits::{EventPublisher, ExecutionStore, RuleSetStore, UsageStore},
    types::{RuleSet, StepRecord, UsageRecord, WorkflowExecution},
    Error, Result,
};

// =============================================================================
// Usage Store
// =============================================================================

/// In-memory usage ledger backend. Append-only: records are never updated
/// or removed.
pub struct InMemoryUsageStore {
    records: DashMap<String, UsageRecord>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn in_range(record: &UsageRecord, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        record.timestamp >= start && record.timestamp <= end
    }
}

impl Default for InMemoryUsageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn insert(&self, record: &UsageRecord) -> Result<()> {
        self.records
            .insert(record.record_id.clone(), record.clone());
        Ok(())
    }

    async fn by_user(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.user_id == user_id && Self::in_range(r.value(), start, end))
            .map(|r| r.clone())
            .collect())
    }

    async fn by_model(
        &self,
        model_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.model_id == model_id && Self::in_range(r.value(), start, end))
            .map(|r| r.clone())
            .collect())
    }

    async fn all(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<UsageRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| Self::in_range(r.value(), start, end))
            .map(|r| r.clone())
            .collect())
    }
}

// =============================================================================
// Rule Set Store
// =============================================================================

/// In-memory rule set store.
pub struct InMemoryRuleSetStore {
    rule_sets: DashMap<String, RuleSet>,
}

impl InMemoryRuleSetStore {
    pub fn new() -> Self {
        Self {
            rule_sets: DashMap::new(),
        }
    }
}

impl Default for InMemoryRuleSetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleSetStore for InMemoryRuleSetStore {
    async fn insert(&self, rule_set: &RuleSet) -> Result<()> {
        self.rule_sets
            .insert(rule_set.rule_set_id.clone(), rule_set.clone());
        Ok(())
    }

    async fn get(&self, rule_set_id: &str) -> Result<Option<RuleSet>> {
        Ok(self.rule_sets.get(rule_set_id).map(|r| r.clone()))
    }

    async fn list(&self, created_by: Option<&str>) -> Result<Vec<RuleSet>> {
        Ok(self
            .rule_sets
            .iter()
            .filter(|r| created_by.is_none() || r.created_by.as_deref() == created_by)
            .map(|r| r.clone())
            .collect())
    }

    async fn update(&self, rule_set: &RuleSet) -> Result<()> {
        if !self.rule_sets.contains_key(&rule_set.rule_set_id) {
            return Err(Error::storage(format!(
                "Rule set {} not found",
                rule_set.rule_set_id
            )));
        }
        self.rule_sets
            .insert(rule_set.rule_set_id.clone(), rule_set.clone());
        Ok(())
    }

    async fn delete(&self, rule_set_id: &str) -> Result<()> {
        self.rule_sets.remove(rule_set_id);
        Ok(())
    }

    async fn increment_usage(&self, rule_set_id: &str) -> Result<()> {
        match self.rule_sets.get_mut(rule_set_id) {
            Some(mut entry) => {
                entry.usage_count += 1;
                entry.last_used = Some(Utc::now());
                Ok(())
            }
            None => Err(Error::storage(format!(
                "Rule set {} not found",
                rule_set_id
            ))),
        }
    }
}

// =============================================================================
// Execution Store
// =============================================================================

/// In-memory workflow execution store with a separate step log per
/// execution.
pub struct InMemoryExecutionStore {
    executions: DashMap<String, WorkflowExecution>,
    step_logs: DashMap<String, Vec<StepRecord>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self {
            executions: DashMap::new(),
            step_logs: DashMap::new(),
        }
    }

    /// The persisted step log for one execution.
    pub fn steps(&self, execution_id: &str) -> Vec<StepRecord> {
        self.step_logs
            .get(execution_id)
            .map(|steps| steps.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn save(&self, execution: &WorkflowExecution) -> Result<()> {
        self.executions
            .insert(execution.execution_id.clone(), execution.clone());
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<WorkflowExecution>> {
        Ok(self.executions.get(execution_id).map(|e| e.clone()))
    }

    async fn append_step(&self, execution_id: &str, step: &StepRecord) -> Result<()> {
        self.step_logs
            .entry(execution_id.to_string())
            .or_default()
            .push(step.clone());
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<String>> {
        Ok(self
            .executions
            .iter()
            .filter(|e| !e.status.is_terminal())
            .map(|e| e.key().clone())
            .collect())
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Broadcast-backed event bus for single-process deployments.
///
/// At-most-once, best-effort: publishing with no subscribers is fine, and a
/// lagging subscriber drops events rather than blocking publishers.
pub struct InMemoryEventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: EventEnvelope) -> Result<()> {
        let _ = self.tx.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use modelflow_core::events::EventType;
    use modelflow_core::types::{ExecutionStatus, TokenUsage};
    use serde_json::{json, Map};
    use uuid::Uuid;

    fn record(user: &str, model: &str) -> UsageRecord {
        let usage = TokenUsage::new(10, 5);
        UsageRecord {
            record_id: Uuid::new_v4().to_string(),
            model_id: model.to_string(),
            user_id: user.to_string(),
            request_id: None,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
            estimated_cost: 0.01,
            currency: "USD".to_string(),
            context: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_usage_queries() {
        let store = InMemoryUsageStore::new();
        store.insert(&record("alice", "m1")).await.unwrap();
        store.insert(&record("bob", "m1")).await.unwrap();
        store.insert(&record("alice", "m2")).await.unwrap();

        let start = Utc::now() - Duration::hours(1);
        let end = Utc::now() + Duration::hours(1);

        assert_eq!(store.by_user("alice", start, end).await.unwrap().len(), 2);
        assert_eq!(store.by_model("m1", start, end).await.unwrap().len(), 2);
        assert_eq!(store.all(start, end).await.unwrap().len(), 3);

        // Out of range
        let past = store
            .all(start - Duration::days(2), start)
            .await
            .unwrap();
        assert!(past.is_empty());
    }

    #[tokio::test]
    async fn test_rule_set_store_round_trip() {
        let store = InMemoryRuleSetStore::new();
        let rule_set = RuleSet::new("rs-1", "test");

        store.insert(&rule_set).await.unwrap();
        let loaded = store.get("rs-1").await.unwrap().unwrap();
        assert_eq!(loaded, rule_set);

        store.increment_usage("rs-1").await.unwrap();
        let bumped = store.get("rs-1").await.unwrap().unwrap();
        assert_eq!(bumped.usage_count, 1);
        assert!(bumped.last_used.is_some());

        store.delete("rs-1").await.unwrap();
        assert!(store.get("rs-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_rule_set_fails() {
        let store = InMemoryRuleSetStore::new();
        let rule_set = RuleSet::new("ghost", "missing");
        assert!(store.update(&rule_set).await.is_err());
        assert!(store.increment_usage("ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_execution_store_with_steps() {
        let store = InMemoryExecutionStore::new();
        let mut execution =
            WorkflowExecution::new("e1", "wf-1", None, Map::new());
        store.save(&execution).await.unwrap();

        let step = StepRecord {
            node_id: "n1".to_string(),
            step_type: "trigger".to_string(),
            data: json!({"triggered": true}),
            timestamp: Utc::now(),
            error: None,
        };
        store.append_step("e1", &step).await.unwrap();
        assert_eq!(store.steps("e1").len(), 1);

        assert_eq!(store.list_active().await.unwrap(), vec!["e1".to_string()]);

        execution.status = ExecutionStatus::Completed;
        store.save(&execution).await.unwrap();
        assert!(store.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_event_bus_fan_out() {
        let bus = InMemoryEventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(EventEnvelope::new(
            EventType::ExecutionStep,
            json!({"node": "n1"}),
        ))
        .await
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::ExecutionStep);

        // Publishing without subscribers must not fail
        drop(rx);
        assert!(bus
            .publish(EventEnvelope::new(EventType::ExecutionStep, json!({})))
            .await
            .is_ok());
    }
}
