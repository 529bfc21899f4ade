//! The workflow executor.
//!
//! Drives one execution at a time per execution id through its graph:
//! PENDING → RUNNING → {COMPLETED, FAILED, CANCELLED}, with human-approval
//! gates as suspension/re-entry points. Node handlers are total: they route
//! collaborator failures into the execution state instead of throwing
//! across node boundaries.

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use modelflow_core::{
    events::{EventEnvelope, EventType},
    template::render_vars,
    traits::{CrmClient, EventPublisher, ExecutionStore},
    types::{
        ExecutionStatus, MessageRecord, NodeSpec, NodeType, PendingApproval, StepRecord,
        WorkflowExecution,
    },
    Error, Result,
};

use crate::agents::AgentDispatcher;
use crate::approval::ApprovalRegistry;
use crate::expr;
use crate::graph::{Edge, WorkflowGraph};

enum NodeOutcome {
    Continue,
    Suspend,
    Fail,
}

/// An execution parked at a human-approval gate.
struct SuspendedExecution {
    graph: Arc<WorkflowGraph>,
    execution: WorkflowExecution,
    node_index: usize,
    steps_taken: usize,
}

pub struct WorkflowExecutor {
    crm: Arc<dyn CrmClient>,
    store: Arc<dyn ExecutionStore>,
    events: Arc<dyn EventPublisher>,
    agents: Arc<dyn AgentDispatcher>,
    approvals: Arc<ApprovalRegistry>,
    suspended: DashMap<String, SuspendedExecution>,
    max_steps: usize,
}

impl WorkflowExecutor {
    pub fn new(
        crm: Arc<dyn CrmClient>,
        store: Arc<dyn ExecutionStore>,
        events: Arc<dyn EventPublisher>,
        agents: Arc<dyn AgentDispatcher>,
    ) -> Self {
        Self {
            crm,
            store,
            events,
            agents,
            approvals: Arc::new(ApprovalRegistry::new()),
            suspended: DashMap::new(),
            max_steps: 100,
        }
    }

    /// Set the node-visit budget per execution. Graphs may contain cycles
    /// (follow-up loops); the budget bounds them.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// The pending-approval registry, for subscribers and HTTP handlers.
    pub fn approvals(&self) -> Arc<ApprovalRegistry> {
        Arc::clone(&self.approvals)
    }

    /// Start a workflow execution. Returns once the execution reaches a
    /// terminal status or suspends at an approval gate.
    pub async fn start(
        &self,
        workflow_id: &str,
        trigger_data: Map<String, Value>,
        lead_id: Option<String>,
    ) -> Result<String> {
        let definition = self
            .crm
            .get_workflow_definition(workflow_id)
            .await?
            .ok_or_else(|| {
                Error::workflow_definition(format!("Workflow {} not found", workflow_id))
            })?;

        // Fresh graph per run; executions never share graph instances.
        let graph = Arc::new(WorkflowGraph::build(&definition)?);

        let execution_id = Uuid::new_v4().to_string();
        let mut execution =
            WorkflowExecution::new(&execution_id, workflow_id, lead_id, trigger_data);
        self.store.save(&execution).await?;

        execution.status = ExecutionStatus::Running;
        tracing::info!(execution = %execution_id, workflow = %workflow_id, "Execution started");

        let entry = graph.entry();
        self.drive(graph, execution, entry, 0).await
    }

    /// Look up an execution: parked ones first, then the store.
    pub async fn get_execution(&self, execution_id: &str) -> Result<Option<WorkflowExecution>> {
        if let Some(parked) = self.suspended.get(execution_id) {
            return Ok(Some(parked.execution.clone()));
        }
        self.store.load(execution_id).await
    }

    /// Cancel an execution. Cancelled executions cannot be resumed, and
    /// their pending approvals become stale.
    pub async fn cancel(&self, execution_id: &str) -> Result<()> {
        self.approvals.remove_for_execution(execution_id);

        if let Some((_, parked)) = self.suspended.remove(execution_id) {
            let mut execution = parked.execution;
            execution.status = ExecutionStatus::Cancelled;
            self.finalize(execution).await;
            return Ok(());
        }

        match self.store.load(execution_id).await? {
            Some(mut execution) if !execution.status.is_terminal() => {
                execution.status = ExecutionStatus::Cancelled;
                self.finalize(execution).await;
                Ok(())
            }
            Some(execution) => Err(Error::workflow_execution(format!(
                "Execution {} already terminal ({:?})",
                execution_id, execution.status
            ))),
            None => Err(Error::workflow_execution(format!(
                "Execution {} not found",
                execution_id
            ))),
        }
    }

    /// Push an approval decision back into a suspended execution.
    ///
    /// Correlates on (execution id, node id); a consumed, cancelled, or
    /// unknown approval is rejected as stale. A conditional edge on the
    /// approval node routes on the decision; a plain edge continues
    /// unconditionally with the decision recorded in the variables.
    pub async fn resume_approval(
        &self,
        execution_id: &str,
        node_id: &str,
        approved: bool,
    ) -> Result<String> {
        self.approvals
            .take(execution_id, node_id)
            .ok_or_else(|| Error::ApprovalNotFound {
                execution_id: execution_id.to_string(),
                node_id: node_id.to_string(),
            })?;

        let Some((_, parked)) = self.suspended.remove(execution_id) else {
            return Err(Error::workflow_execution(format!(
                "Execution {} is not awaiting approval",
                execution_id
            )));
        };
        let SuspendedExecution {
            graph,
            mut execution,
            node_index,
            steps_taken,
        } = parked;

        tracing::info!(execution = %execution_id, node = %node_id, approved, "Approval decided");

        execution.set_variable("approval_pending", json!(false));
        execution.set_variable("approval_result", json!(approved));
        execution.set_variable("condition_result", json!(approved));
        self.log_step(
            &mut execution,
            node_id,
            "approval_decision",
            json!({ "approved": approved }),
            None,
        )
        .await;

        let next = match graph.edge(node_index) {
            Edge::Next(next) => Some(next),
            Edge::Conditional { on_true, on_false } => {
                Some(if approved { on_true } else { on_false })
            }
            Edge::Terminal => None,
        };

        match next {
            Some(next) => self.drive(graph, execution, next, steps_taken).await,
            None => {
                execution.status = ExecutionStatus::Completed;
                self.finalize(execution).await;
                Ok(execution_id.to_string())
            }
        }
    }

    /// Run the graph from `current` until terminal or suspension.
    async fn drive(
        &self,
        graph: Arc<WorkflowGraph>,
        mut execution: WorkflowExecution,
        mut current: usize,
        mut steps_taken: usize,
    ) -> Result<String> {
        let execution_id = execution.execution_id.clone();

        loop {
            if steps_taken >= self.max_steps {
                let msg = format!("Execution exceeded node budget of {}", self.max_steps);
                tracing::error!(execution = %execution_id, "{}", msg);
                execution.error = Some(msg);
                execution.status = ExecutionStatus::Failed;
                break;
            }
            steps_taken += 1;

            let node = graph.node(current).clone();
            execution.current_node = node.id.clone();

            match self.run_node(&node, &mut execution).await {
                NodeOutcome::Continue => {}
                NodeOutcome::Suspend => {
                    if let Err(e) = self.store.save(&execution).await {
                        tracing::error!(execution = %execution_id, error = %e, "Suspension persist failed");
                    }
                    self.suspended.insert(
                        execution_id.clone(),
                        SuspendedExecution {
                            graph,
                            execution,
                            node_index: current,
                            steps_taken,
                        },
                    );
                    return Ok(execution_id);
                }
                NodeOutcome::Fail => {
                    execution.status = ExecutionStatus::Failed;
                    break;
                }
            }

            match graph.edge(current) {
                Edge::Next(next) => current = next,
                Edge::Conditional { on_true, on_false } => {
                    let branch = execution
                        .variable("condition_result")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    current = if branch { on_true } else { on_false };
                }
                Edge::Terminal => {
                    execution.status = ExecutionStatus::Completed;
                    break;
                }
            }
        }

        self.finalize(execution).await;
        Ok(execution_id)
    }

    async fn run_node(&self, node: &NodeSpec, execution: &mut WorkflowExecution) -> NodeOutcome {
        match node.node_type {
            NodeType::Trigger => {
                self.log_step(execution, &node.id, "trigger", json!({ "triggered": true }), None)
                    .await;
                NodeOutcome::Continue
            }

            NodeType::AiAgent => self.run_ai_agent(node, execution).await,

            NodeType::Condition => {
                let template = node
                    .config
                    .get("condition")
                    .and_then(Value::as_str)
                    .unwrap_or("true");
                let substituted = render_vars(template, &execution.variables);

                // Evaluation failure routes to the false branch; it does not
                // fail the run.
                let result = match expr::evaluate(&substituted) {
                    Ok(result) => result,
                    Err(e) => {
                        execution.error = Some(format!("Condition evaluation error: {}", e));
                        false
                    }
                };
                execution.set_variable("condition_result", json!(result));

                self.log_step(
                    execution,
                    &node.id,
                    "condition",
                    json!({ "expression": substituted, "result": result }),
                    None,
                )
                .await;
                NodeOutcome::Continue
            }

            NodeType::HumanApproval => {
                let message = node
                    .config
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Approval required");
                let message = render_vars(message, &execution.variables);

                self.approvals.register(PendingApproval {
                    execution_id: execution.execution_id.clone(),
                    node_id: node.id.clone(),
                    message: message.clone(),
                    context: execution.variables.clone(),
                    lead_id: execution.lead_id.clone(),
                    requested_at: Utc::now(),
                });
                execution.set_variable("approval_pending", json!(true));

                self.publish(
                    EventType::ApprovalRequired,
                    json!({
                        "execution_id": execution.execution_id,
                        "node_id": node.id,
                        "message": message,
                        "lead_id": execution.lead_id,
                    }),
                    &execution.execution_id,
                )
                .await;

                self.log_step(
                    execution,
                    &node.id,
                    "human_approval",
                    json!({ "approval_requested": true }),
                    None,
                )
                .await;
                NodeOutcome::Suspend
            }

            NodeType::SendMessage => self.run_send_message(node, execution).await,

            NodeType::UpdateLead => self.run_update_lead(node, execution).await,

            NodeType::Delay => {
                let delay = node
                    .config
                    .get("delay")
                    .and_then(Value::as_u64)
                    .unwrap_or(1);

                // The core only marks intent; actual suspension scheduling
                // belongs to an external collaborator.
                execution.set_variable("delay_applied", json!(delay));
                self.log_step(execution, &node.id, "delay", json!({ "delay": delay }), None)
                    .await;
                NodeOutcome::Continue
            }
        }
    }

    async fn run_ai_agent(&self, node: &NodeSpec, execution: &mut WorkflowExecution) -> NodeOutcome {
        let agent_type = node
            .config
            .get("agentType")
            .and_then(Value::as_str)
            .unwrap_or("general")
            .to_string();
        let prompt = node
            .config
            .get("prompt")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let lead_id = execution.lead_id.clone();

        match self
            .agents
            .dispatch(&agent_type, lead_id.as_deref(), &prompt, &execution.variables)
            .await
        {
            Ok(result) => {
                for (key, value) in &result {
                    execution.variables.insert(key.clone(), value.clone());
                }
                execution.messages.push(MessageRecord {
                    kind: "ai_response".to_string(),
                    content: result
                        .get("response")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    confidence: result
                        .get("confidence")
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0) as f32,
                });

                self.log_step(execution, &node.id, "ai_agent", Value::Object(result), None)
                    .await;
                NodeOutcome::Continue
            }
            Err(e) => {
                let msg = format!("AI agent {} failed: {}", agent_type, e);
                execution.error = Some(msg.clone());
                self.log_step(
                    execution,
                    &node.id,
                    "ai_agent",
                    json!({ "agent_type": agent_type }),
                    Some(msg),
                )
                .await;
                NodeOutcome::Fail
            }
        }
    }

    async fn run_send_message(
        &self,
        node: &NodeSpec,
        execution: &mut WorkflowExecution,
    ) -> NodeOutcome {
        let template = node
            .config
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("");
        let message = render_vars(template, &execution.variables);

        if let Some(lead_id) = execution.lead_id.clone() {
            match self.crm.send_message(&lead_id, &message).await {
                Ok(result) => {
                    execution.set_variable("message_sent", json!(true));
                    if let Some(message_id) =
                        result.as_ref().and_then(|value| value.get("message_id"))
                    {
                        execution.set_variable("message_id", message_id.clone());
                    }
                    execution.messages.push(MessageRecord {
                        kind: "sent_message".to_string(),
                        content: message.clone(),
                        confidence: 0.0,
                    });
                }
                Err(e) => {
                    let msg = format!("Message send failed: {}", e);
                    execution.error = Some(msg.clone());
                    self.log_step(
                        execution,
                        &node.id,
                        "send_message",
                        json!({ "message": message }),
                        Some(msg),
                    )
                    .await;
                    return NodeOutcome::Fail;
                }
            }
        }

        self.log_step(
            execution,
            &node.id,
            "send_message",
            json!({ "message": message }),
            None,
        )
        .await;
        NodeOutcome::Continue
    }

    async fn run_update_lead(
        &self,
        node: &NodeSpec,
        execution: &mut WorkflowExecution,
    ) -> NodeOutcome {
        let mut updates = Map::new();
        for key in ["status", "priority", "aiScore"] {
            if let Some(value) = node.config.get(key) {
                updates.insert(key.to_string(), value.clone());
            }
        }

        if let Some(lead_id) = execution.lead_id.clone() {
            if !updates.is_empty() {
                match self.crm.update_lead(&lead_id, &Value::Object(updates.clone())).await {
                    Ok(_) => {
                        execution.set_variable("lead_updated", json!(true));
                        execution.set_variable("updates", Value::Object(updates.clone()));
                    }
                    Err(e) => {
                        let msg = format!("Lead update failed: {}", e);
                        execution.error = Some(msg.clone());
                        self.log_step(
                            execution,
                            &node.id,
                            "update_lead",
                            Value::Object(updates),
                            Some(msg),
                        )
                        .await;
                        return NodeOutcome::Fail;
                    }
                }
            }
        }

        self.log_step(execution, &node.id, "update_lead", Value::Object(updates), None)
            .await;
        NodeOutcome::Continue
    }

    /// Append a step to the execution log, persist it, and publish the
    /// step event. Persistence/publish failures degrade to log lines.
    async fn log_step(
        &self,
        execution: &mut WorkflowExecution,
        node_id: &str,
        step_type: &str,
        data: Value,
        error: Option<String>,
    ) {
        let step = StepRecord {
            node_id: node_id.to_string(),
            step_type: step_type.to_string(),
            data: data.clone(),
            timestamp: Utc::now(),
            error: error.clone(),
        };
        execution.steps.push(step.clone());

        if let Err(e) = self.store.append_step(&execution.execution_id, &step).await {
            tracing::warn!(execution = %execution.execution_id, error = %e, "Step not persisted");
        }

        self.publish(
            EventType::ExecutionStep,
            json!({
                "execution_id": execution.execution_id,
                "node_id": node_id,
                "step_type": step_type,
                "data": data,
                "error": error,
            }),
            &execution.execution_id,
        )
        .await;
    }

    /// Terminal bookkeeping, identical on every path: persist the final
    /// state, publish the completion event exactly once, and drop the
    /// execution from the active set.
    async fn finalize(&self, mut execution: WorkflowExecution) {
        execution.finished_at = Some(Utc::now());
        execution.current_node = String::new();

        if let Err(e) = self.store.save(&execution).await {
            tracing::error!(execution = %execution.execution_id, error = %e, "Final state persist failed");
        }

        self.publish(
            EventType::WorkflowCompleted,
            json!({
                "execution_id": execution.execution_id,
                "workflow_id": execution.workflow_id,
                "status": execution.status,
                "lead_id": execution.lead_id,
                "error": execution.error,
            }),
            &execution.execution_id,
        )
        .await;

        self.suspended.remove(&execution.execution_id);

        tracing::info!(
            execution = %execution.execution_id,
            status = ?execution.status,
            "Execution finished"
        );
    }

    async fn publish(&self, event_type: EventType, payload: Value, trace: &str) {
        let event = EventEnvelope::new(event_type, payload).with_trace(trace);
        if let Err(e) = self.events.publish(event).await {
            tracing::debug!(error = %e, "Event not published");
        }
    }
}
