//! Arena-style workflow graph.
//!
//! Nodes and edges live in indexed collections; the current node during
//! execution is an index into them. Keeping routing explicit makes graph
//! validation (single entry point, no dangling targets) a structural check
//! independent of execution.

use std::collections::HashMap;

use modelflow_core::{
    types::{NodeSpec, NodeType, WorkflowDefinition},
    Error, Result,
};

/// Outgoing routing of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Unconditional edge to the next node.
    Next(usize),
    /// Two-outcome edge routed by the node's last-computed condition result.
    Conditional { on_true: usize, on_false: usize },
    /// No outgoing connection: the execution terminates here.
    Terminal,
}

/// A validated workflow graph, built once per execution.
///
/// Graphs are not shared across executions; each run gets an independent
/// instance so state can never leak between concurrent runs of the same
/// workflow.
#[derive(Debug)]
pub struct WorkflowGraph {
    nodes: Vec<NodeSpec>,
    edges: Vec<Edge>,
    entry: usize,
}

impl WorkflowGraph {
    /// Build and validate a graph from a workflow definition.
    ///
    /// Construction fails fast on an empty definition, duplicate node ids,
    /// dangling connection targets, and zero or multiple trigger nodes.
    /// Cycles are permitted (follow-up loops are legitimate); the executor
    /// bounds them with a node-visit budget.
    pub fn build(definition: &WorkflowDefinition) -> Result<Self> {
        if definition.nodes.is_empty() {
            return Err(Error::workflow_definition(format!(
                "Workflow {} has no nodes",
                definition.workflow_id
            )));
        }

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, node) in definition.nodes.iter().enumerate() {
            if index.insert(node.id.as_str(), i).is_some() {
                return Err(Error::workflow_definition(format!(
                    "Duplicate node id: {}",
                    node.id
                )));
            }
        }

        let triggers: Vec<&NodeSpec> = definition
            .nodes
            .iter()
            .filter(|node| node.node_type == NodeType::Trigger)
            .collect();
        let entry = match triggers.as_slice() {
            [only] => index[only.id.as_str()],
            [] => {
                return Err(Error::workflow_definition(format!(
                    "Workflow {} has no trigger node",
                    definition.workflow_id
                )))
            }
            many => {
                let ids: Vec<&str> = many.iter().map(|node| node.id.as_str()).collect();
                return Err(Error::workflow_definition(format!(
                    "Workflow {} has multiple trigger nodes: {}",
                    definition.workflow_id,
                    ids.join(", ")
                )));
            }
        };

        let resolve = |node_id: &str, target: &str| -> Result<usize> {
            index.get(target).copied().ok_or_else(|| {
                Error::workflow_definition(format!(
                    "Node {} connects to unknown node {}",
                    node_id, target
                ))
            })
        };

        let mut edges = Vec::with_capacity(definition.nodes.len());
        for node in &definition.nodes {
            let edge = if let Some(next) = node.connections.get("next") {
                Edge::Next(resolve(&node.id, next)?)
            } else if let (Some(on_true), Some(on_false)) =
                (node.connections.get("true"), node.connections.get("false"))
            {
                Edge::Conditional {
                    on_true: resolve(&node.id, on_true)?,
                    on_false: resolve(&node.id, on_false)?,
                }
            } else if node.connections.is_empty() {
                Edge::Terminal
            } else {
                return Err(Error::workflow_definition(format!(
                    "Node {} has unsupported connection keys: {:?}",
                    node.id,
                    node.connections.keys().collect::<Vec<_>>()
                )));
            };
            edges.push(edge);
        }

        Ok(Self {
            nodes: definition.nodes.clone(),
            edges,
            entry,
        })
    }

    /// Index of the entry (trigger) node.
    pub fn entry(&self) -> usize {
        self.entry
    }

    pub fn node(&self, index: usize) -> &NodeSpec {
        &self.nodes[index]
    }

    pub fn edge(&self, index: usize) -> Edge {
        self.edges[index]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(nodes: Vec<NodeSpec>) -> WorkflowDefinition {
        WorkflowDefinition {
            workflow_id: "wf-1".to_string(),
            name: "test".to_string(),
            nodes,
        }
    }

    #[test]
    fn test_linear_graph() {
        let graph = WorkflowGraph::build(&definition(vec![
            NodeSpec::new("start", NodeType::Trigger).with_next("end"),
            NodeSpec::new("end", NodeType::SendMessage),
        ]))
        .unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.entry(), 0);
        assert_eq!(graph.edge(0), Edge::Next(1));
        assert_eq!(graph.edge(1), Edge::Terminal);
    }

    #[test]
    fn test_conditional_edges() {
        let graph = WorkflowGraph::build(&definition(vec![
            NodeSpec::new("start", NodeType::Trigger).with_next("check"),
            NodeSpec::new("check", NodeType::Condition).with_branches("yes", "no"),
            NodeSpec::new("yes", NodeType::SendMessage),
            NodeSpec::new("no", NodeType::UpdateLead),
        ]))
        .unwrap();

        assert_eq!(
            graph.edge(1),
            Edge::Conditional {
                on_true: 2,
                on_false: 3
            }
        );
    }

    #[test]
    fn test_missing_trigger_rejected() {
        let result = WorkflowGraph::build(&definition(vec![NodeSpec::new(
            "a",
            NodeType::SendMessage,
        )]));
        assert!(matches!(result, Err(Error::WorkflowDefinition(_))));
    }

    #[test]
    fn test_multiple_triggers_rejected() {
        let result = WorkflowGraph::build(&definition(vec![
            NodeSpec::new("t1", NodeType::Trigger),
            NodeSpec::new("t2", NodeType::Trigger),
        ]));

        match result {
            Err(Error::WorkflowDefinition(msg)) => {
                assert!(msg.contains("t1"));
                assert!(msg.contains("t2"));
            }
            other => panic!("Expected definition error, got {:?}", other.map(|g| g.len())),
        }
    }

    #[test]
    fn test_dangling_target_rejected() {
        let result = WorkflowGraph::build(&definition(vec![
            NodeSpec::new("start", NodeType::Trigger).with_next("ghost"),
        ]));
        assert!(matches!(result, Err(Error::WorkflowDefinition(_))));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = WorkflowGraph::build(&definition(vec![
            NodeSpec::new("start", NodeType::Trigger),
            NodeSpec::new("start", NodeType::Delay),
        ]));
        assert!(matches!(result, Err(Error::WorkflowDefinition(_))));
    }

    #[test]
    fn test_cycles_are_allowed() {
        // Follow-up loops back to an earlier node; bounded at runtime
        let graph = WorkflowGraph::build(&definition(vec![
            NodeSpec::new("start", NodeType::Trigger).with_next("wait"),
            NodeSpec::new("wait", NodeType::Delay).with_next("check"),
            NodeSpec::new("check", NodeType::Condition).with_branches("wait", "done"),
            NodeSpec::new("done", NodeType::SendMessage),
        ]));
        assert!(graph.is_ok());
    }
}
