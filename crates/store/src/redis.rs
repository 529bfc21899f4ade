//! Redis implementations: durable execution store and event fan-out.

use async_trait::async_trait;
use redis::{AsyncCommands, Client};

use modelflow_core::{
    events::EventEnvelope,
    traits::{EventPublisher, ExecutionStore},
    types::{StepRecord, WorkflowExecution},
    Error, Result,
};

/// Redis persistence for workflow executions and their step logs.
pub struct RedisExecutionStore {
    client: Client,
    prefix: String,
    ttl_seconds: u64,
}

impl RedisExecutionStore {
    pub fn new(url: &str, prefix: &str, ttl_seconds: u64) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| Error::storage(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self {
            client,
            prefix: prefix.to_string(),
            ttl_seconds,
        })
    }

    fn key(&self, execution_id: &str) -> String {
        format!("{}:{}", self.prefix, execution_id)
    }

    fn steps_key(&self, execution_id: &str) -> String {
        format!("{}:steps:{}", self.prefix, execution_id)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::storage(format!("Redis connection error: {}", e)))
    }
}

#[async_trait]
impl ExecutionStore for RedisExecutionStore {
    async fn save(&self, execution: &WorkflowExecution) -> Result<()> {
        let mut conn = self.connection().await?;

        let json = serde_json::to_string(execution)
            .map_err(|e| Error::storage(format!("Failed to serialize execution: {}", e)))?;

        let _: () = conn
            .set_ex(self.key(&execution.execution_id), json, self.ttl_seconds)
            .await
            .map_err(|e| Error::storage(format!("Redis set error: {}", e)))?;

        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<WorkflowExecution>> {
        let mut conn = self.connection().await?;

        let data: Option<String> = conn
            .get(self.key(execution_id))
            .await
            .map_err(|e| Error::storage(format!("Redis get error: {}", e)))?;

        match data {
            Some(json) => {
                let execution = serde_json::from_str(&json)
                    .map_err(|e| Error::storage(format!("Failed to deserialize execution: {}", e)))?;
                Ok(Some(execution))
            }
            None => Ok(None),
        }
    }

    async fn append_step(&self, execution_id: &str, step: &StepRecord) -> Result<()> {
        let mut conn = self.connection().await?;

        let json = serde_json::to_string(step)
            .map_err(|e| Error::storage(format!("Failed to serialize step: {}", e)))?;

        let key = self.steps_key(execution_id);
        let _: () = conn
            .rpush(&key, json)
            .await
            .map_err(|e| Error::storage(format!("Redis rpush error: {}", e)))?;
        let _: () = conn
            .expire(&key, self.ttl_seconds as i64)
            .await
            .map_err(|e| Error::storage(format!("Redis expire error: {}", e)))?;

        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;

        let pattern = format!("{}:*", self.prefix);
        let keys: Vec<String> = conn
            .keys(&pattern)
            .await
            .map_err(|e| Error::storage(format!("Redis keys error: {}", e)))?;

        let steps_prefix = format!("{}:steps:", self.prefix);
        let mut active = Vec::new();
        for key in keys {
            if key.starts_with(&steps_prefix) {
                continue;
            }
            let data: Option<String> = conn
                .get(&key)
                .await
                .map_err(|e| Error::storage(format!("Redis get error: {}", e)))?;
            if let Some(json) = data {
                if let Ok(execution) = serde_json::from_str::<WorkflowExecution>(&json) {
                    if !execution.status.is_terminal() {
                        active.push(execution.execution_id);
                    }
                }
            }
        }

        Ok(active)
    }
}

/// Publishes events onto a Redis pub/sub channel for cross-process
/// listeners. At-most-once: a failed publish is the caller's log line,
/// never a retry loop.
pub struct RedisEventPublisher {
    client: Client,
    channel: String,
}

impl RedisEventPublisher {
    pub fn new(url: &str, channel: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| Error::storage(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self {
            client,
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn publish(&self, event: EventEnvelope) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::storage(format!("Redis connection error: {}", e)))?;

        let json = serde_json::to_string(&event)
            .map_err(|e| Error::storage(format!("Failed to serialize event: {}", e)))?;

        let _: () = conn
            .publish(&self.channel, json)
            .await
            .map_err(|e| Error::storage(format!("Redis publish error: {}", e)))?;

        Ok(())
    }
}
