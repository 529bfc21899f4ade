//! Workflow executor integration tests over mock collaborators.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use modelflow_core::{
    events::EventType,
    mocks::{CollectingEventPublisher, MockCrmClient},
    traits::CrmClient,
    types::{ExecutionStatus, NodeSpec, NodeType, WorkflowDefinition},
    Error, ExecutionStore, Result,
};
use modelflow_store::InMemoryExecutionStore;
use modelflow_workflow::{AgentDispatcher, WorkflowExecutor};

struct StubAgents {
    result: Map<String, Value>,
}

impl StubAgents {
    fn scoring(score: i64) -> Self {
        let mut result = Map::new();
        result.insert("score".to_string(), json!(score));
        result.insert("response".to_string(), json!("qualified"));
        result.insert("confidence".to_string(), json!(0.9));
        Self { result }
    }
}

#[async_trait]
impl AgentDispatcher for StubAgents {
    async fn dispatch(
        &self,
        _agent_type: &str,
        _lead_id: Option<&str>,
        _prompt: &str,
        _variables: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        Ok(self.result.clone())
    }
}

struct FailingAgents;

#[async_trait]
impl AgentDispatcher for FailingAgents {
    async fn dispatch(
        &self,
        _agent_type: &str,
        _lead_id: Option<&str>,
        _prompt: &str,
        _variables: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        Err(Error::model_provider("agent exploded"))
    }
}

fn scoring_workflow() -> WorkflowDefinition {
    WorkflowDefinition {
        workflow_id: "wf-scoring".to_string(),
        name: "score and route".to_string(),
        nodes: vec![
            NodeSpec::new("start", NodeType::Trigger).with_next("qualify"),
            NodeSpec::new("qualify", NodeType::AiAgent)
                .with_config("agentType", json!("general"))
                .with_config("prompt", json!("Qualify this lead"))
                .with_next("check"),
            NodeSpec::new("check", NodeType::Condition)
                .with_config("condition", json!("{score} > 70"))
                .with_branches("notify", "downgrade"),
            NodeSpec::new("notify", NodeType::SendMessage)
                .with_config("message", json!("Your score is {score}")),
            NodeSpec::new("downgrade", NodeType::UpdateLead)
                .with_config("status", json!("COLD")),
        ],
    }
}

fn approval_workflow() -> WorkflowDefinition {
    WorkflowDefinition {
        workflow_id: "wf-approval".to_string(),
        name: "gated send".to_string(),
        nodes: vec![
            NodeSpec::new("start", NodeType::Trigger).with_next("gate"),
            NodeSpec::new("gate", NodeType::HumanApproval)
                .with_config("message", json!("Send the offer?"))
                .with_branches("send", "mark_lost"),
            NodeSpec::new("send", NodeType::SendMessage)
                .with_config("message", json!("Here is your offer")),
            NodeSpec::new("mark_lost", NodeType::UpdateLead).with_config("status", json!("LOST")),
        ],
    }
}

struct Harness {
    executor: WorkflowExecutor,
    crm: Arc<MockCrmClient>,
    events: Arc<CollectingEventPublisher>,
    store: Arc<InMemoryExecutionStore>,
}

fn harness(definition: WorkflowDefinition, agents: Arc<dyn AgentDispatcher>) -> Harness {
    let crm = Arc::new(MockCrmClient::new().with_workflow(definition));
    let events = Arc::new(CollectingEventPublisher::new());
    let store = Arc::new(InMemoryExecutionStore::new());
    let executor = WorkflowExecutor::new(crm.clone(), store.clone(), events.clone(), agents);
    Harness {
        executor,
        crm,
        events,
        store,
    }
}

fn completed_events(events: &CollectingEventPublisher) -> usize {
    events
        .events()
        .iter()
        .filter(|event| event.event_type == EventType::WorkflowCompleted)
        .count()
}

#[tokio::test]
async fn test_condition_true_routes_to_send_message() {
    let h = harness(scoring_workflow(), Arc::new(StubAgents::scoring(85)));

    let execution_id = h
        .executor
        .start("wf-scoring", Map::new(), Some("lead-1".to_string()))
        .await
        .unwrap();

    let execution = h.store.load(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.variables.get("condition_result"), Some(&json!(true)));
    assert_eq!(execution.variables.get("message_sent"), Some(&json!(true)));

    // send_message ran with the substituted template; update_lead did not
    let sent = h.crm.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, "Your score is 85");
    assert!(h.crm.lead_updates().is_empty());
}

#[tokio::test]
async fn test_condition_false_routes_to_update_lead() {
    let h = harness(scoring_workflow(), Arc::new(StubAgents::scoring(50)));

    let execution_id = h
        .executor
        .start("wf-scoring", Map::new(), Some("lead-1".to_string()))
        .await
        .unwrap();

    let execution = h.store.load(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);

    assert!(h.crm.sent_messages().is_empty());
    let updates = h.crm.lead_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1["status"], json!("COLD"));
}

#[tokio::test]
async fn test_completion_event_published_exactly_once() {
    let h = harness(scoring_workflow(), Arc::new(StubAgents::scoring(85)));

    h.executor
        .start("wf-scoring", Map::new(), Some("lead-1".to_string()))
        .await
        .unwrap();

    assert_eq!(completed_events(&h.events), 1);
}

#[tokio::test]
async fn test_approval_gate_suspends_execution() {
    let h = harness(approval_workflow(), Arc::new(StubAgents::scoring(0)));

    let execution_id = h
        .executor
        .start("wf-approval", Map::new(), Some("lead-1".to_string()))
        .await
        .unwrap();

    // Suspended, not terminal
    let execution = h.executor.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);
    assert_eq!(execution.variables.get("approval_pending"), Some(&json!(true)));

    // Pending record keyed by (execution id, node id)
    assert!(h.executor.approvals().get(&execution_id, "gate").is_some());

    // Notified, but no completion yet
    assert!(h
        .events
        .events()
        .iter()
        .any(|event| event.event_type == EventType::ApprovalRequired));
    assert_eq!(completed_events(&h.events), 0);
}

#[tokio::test]
async fn test_approved_resume_takes_true_branch() {
    let h = harness(approval_workflow(), Arc::new(StubAgents::scoring(0)));

    let execution_id = h
        .executor
        .start("wf-approval", Map::new(), Some("lead-1".to_string()))
        .await
        .unwrap();

    h.executor
        .resume_approval(&execution_id, "gate", true)
        .await
        .unwrap();

    let execution = h.store.load(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.variables.get("approval_result"), Some(&json!(true)));

    assert_eq!(h.crm.sent_messages().len(), 1);
    assert!(h.crm.lead_updates().is_empty());
    assert_eq!(completed_events(&h.events), 1);
}

#[tokio::test]
async fn test_denied_resume_takes_false_branch() {
    let h = harness(approval_workflow(), Arc::new(StubAgents::scoring(0)));

    let execution_id = h
        .executor
        .start("wf-approval", Map::new(), Some("lead-1".to_string()))
        .await
        .unwrap();

    h.executor
        .resume_approval(&execution_id, "gate", false)
        .await
        .unwrap();

    assert!(h.crm.sent_messages().is_empty());
    assert_eq!(h.crm.lead_updates()[0].1["status"], json!("LOST"));
}

#[tokio::test]
async fn test_resume_is_single_use() {
    let h = harness(approval_workflow(), Arc::new(StubAgents::scoring(0)));

    let execution_id = h
        .executor
        .start("wf-approval", Map::new(), Some("lead-1".to_string()))
        .await
        .unwrap();

    h.executor
        .resume_approval(&execution_id, "gate", true)
        .await
        .unwrap();

    // The approval was consumed; a second decision is stale
    assert!(matches!(
        h.executor.resume_approval(&execution_id, "gate", true).await,
        Err(Error::ApprovalNotFound { .. })
    ));
}

#[tokio::test]
async fn test_cancelled_execution_rejects_late_approval() {
    let h = harness(approval_workflow(), Arc::new(StubAgents::scoring(0)));

    let execution_id = h
        .executor
        .start("wf-approval", Map::new(), Some("lead-1".to_string()))
        .await
        .unwrap();

    h.executor.cancel(&execution_id).await.unwrap();

    let execution = h.store.load(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert_eq!(completed_events(&h.events), 1);

    assert!(matches!(
        h.executor.resume_approval(&execution_id, "gate", true).await,
        Err(Error::ApprovalNotFound { .. })
    ));

    // No resurrection from a terminal state
    assert!(h.executor.cancel(&execution_id).await.is_err());
}

#[tokio::test]
async fn test_agent_failure_fails_execution_with_bookkeeping() {
    let h = harness(scoring_workflow(), Arc::new(FailingAgents));

    let execution_id = h
        .executor
        .start("wf-scoring", Map::new(), Some("lead-1".to_string()))
        .await
        .unwrap();

    let execution = h.store.load(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.as_deref().unwrap().contains("agent exploded"));

    // The failing node's step log entry records the error
    let failed_step = execution
        .steps
        .iter()
        .find(|step| step.step_type == "ai_agent")
        .unwrap();
    assert!(failed_step.error.is_some());

    // Failure still reaches a terminal state and emits its completion event
    assert_eq!(completed_events(&h.events), 1);
}

#[tokio::test]
async fn test_crm_failure_is_node_local() {
    // Workflow fetch succeeds, message send fails
    struct FlakySendCrm {
        inner: MockCrmClient,
    }

    #[async_trait]
    impl CrmClient for FlakySendCrm {
        async fn get_lead(&self, lead_id: &str) -> Result<Option<Value>> {
            self.inner.get_lead(lead_id).await
        }
        async fn update_lead(&self, lead_id: &str, patch: &Value) -> Result<Option<Value>> {
            self.inner.update_lead(lead_id, patch).await
        }
        async fn send_message(&self, _lead_id: &str, _content: &str) -> Result<Option<Value>> {
            Err(Error::crm("connection reset"))
        }
        async fn get_workflow_definition(
            &self,
            workflow_id: &str,
        ) -> Result<Option<WorkflowDefinition>> {
            self.inner.get_workflow_definition(workflow_id).await
        }
        async fn get_lead_interactions(&self, lead_id: &str) -> Result<Vec<Value>> {
            self.inner.get_lead_interactions(lead_id).await
        }
        async fn get_lead_messages(&self, lead_id: &str) -> Result<Vec<Value>> {
            self.inner.get_lead_messages(lead_id).await
        }
    }

    let crm = Arc::new(FlakySendCrm {
        inner: MockCrmClient::new().with_workflow(scoring_workflow()),
    });
    let events = Arc::new(CollectingEventPublisher::new());
    let store = Arc::new(InMemoryExecutionStore::new());
    let executor = WorkflowExecutor::new(
        crm,
        store.clone(),
        events.clone(),
        Arc::new(StubAgents::scoring(85)),
    );

    let execution_id = executor
        .start("wf-scoring", Map::new(), Some("lead-1".to_string()))
        .await
        .unwrap();

    // The transport failure fails the run, not the process
    let execution = store.load(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.as_deref().unwrap().contains("connection reset"));
    assert_eq!(completed_events(&events), 1);
}

#[tokio::test]
async fn test_cycle_hits_node_budget() {
    let looping = WorkflowDefinition {
        workflow_id: "wf-loop".to_string(),
        name: "endless follow-up".to_string(),
        nodes: vec![
            NodeSpec::new("start", NodeType::Trigger).with_next("wait"),
            NodeSpec::new("wait", NodeType::Delay).with_next("wait"),
        ],
    };

    let crm = Arc::new(MockCrmClient::new().with_workflow(looping));
    let events = Arc::new(CollectingEventPublisher::new());
    let store = Arc::new(InMemoryExecutionStore::new());
    let executor = WorkflowExecutor::new(
        crm,
        store.clone(),
        events.clone(),
        Arc::new(StubAgents::scoring(0)),
    )
    .with_max_steps(5);

    let execution_id = executor
        .start("wf-loop", Map::new(), None)
        .await
        .unwrap();

    let execution = store.load(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.as_deref().unwrap().contains("node budget"));
    assert_eq!(completed_events(&events), 1);
}

#[tokio::test]
async fn test_unknown_workflow_is_definition_error() {
    let crm = Arc::new(MockCrmClient::new());
    let store = Arc::new(InMemoryExecutionStore::new());
    let executor = WorkflowExecutor::new(
        crm,
        store,
        Arc::new(CollectingEventPublisher::new()),
        Arc::new(StubAgents::scoring(0)),
    );

    assert!(matches!(
        executor.start("missing", Map::new(), None).await,
        Err(Error::WorkflowDefinition(_))
    ));
}
