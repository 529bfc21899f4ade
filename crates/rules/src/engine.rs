//! The rule engine: rule-set lifecycle, caching, and phase application.

use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;

use modelflow_core::{
    events::{EventEnvelope, EventType},
    traits::{EventPublisher, RuleSetStore},
    types::{CustomRule, GenerationRequest, GenerationResponse, RuleSet},
    Result,
};

use crate::action::{apply_input_action, apply_output_action};
use crate::condition::check_condition;
use crate::validate::validate_rule;

/// Processes custom rules around AI requests and responses.
///
/// Rule sets live in the persistent store; a write-through in-memory cache
/// (no expiry) fronts every read and is refreshed on every create, update,
/// and delete. Caches are a performance optimization: on restart they start
/// empty and repopulate lazily.
pub struct RuleEngine {
    store: Arc<dyn RuleSetStore>,
    cache: DashMap<String, RuleSet>,
    events: Option<Arc<dyn EventPublisher>>,
}

impl RuleEngine {
    pub fn new(store: Arc<dyn RuleSetStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            events: None,
        }
    }

    /// Publish per-phase usage events through this channel.
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    // =========================================================================
    // Rule-set lifecycle
    // =========================================================================

    /// Create a new rule set. Every rule is validated before persistence.
    pub async fn create_rule_set(&self, rule_set: RuleSet) -> Result<RuleSet> {
        for rule in &rule_set.rules {
            validate_rule(rule)?;
        }

        self.store.insert(&rule_set).await?;
        self.cache
            .insert(rule_set.rule_set_id.clone(), rule_set.clone());

        tracing::info!(rule_set = %rule_set.rule_set_id, "Created rule set");
        Ok(rule_set)
    }

    /// Get a rule set by id, cache first.
    pub async fn get_rule_set(&self, rule_set_id: &str) -> Result<Option<RuleSet>> {
        if let Some(cached) = self.cache.get(rule_set_id) {
            return Ok(Some(cached.clone()));
        }

        match self.store.get(rule_set_id).await? {
            Some(rule_set) => {
                self.cache
                    .insert(rule_set.rule_set_id.clone(), rule_set.clone());
                Ok(Some(rule_set))
            }
            None => Ok(None),
        }
    }

    /// List rule sets, optionally filtered by creator.
    pub async fn list_rule_sets(&self, created_by: Option<&str>) -> Result<Vec<RuleSet>> {
        let rule_sets = self.store.list(created_by).await?;
        for rule_set in &rule_sets {
            self.cache
                .insert(rule_set.rule_set_id.clone(), rule_set.clone());
        }
        Ok(rule_sets)
    }

    /// Update an existing rule set.
    pub async fn update_rule_set(&self, rule_set_id: &str, mut rule_set: RuleSet) -> Result<RuleSet> {
        for rule in &rule_set.rules {
            validate_rule(rule)?;
        }

        rule_set.rule_set_id = rule_set_id.to_string();
        rule_set.updated_at = Utc::now();

        self.store.update(&rule_set).await?;
        self.cache
            .insert(rule_set.rule_set_id.clone(), rule_set.clone());

        tracing::info!(rule_set = %rule_set_id, "Updated rule set");
        Ok(rule_set)
    }

    /// Delete a rule set.
    pub async fn delete_rule_set(&self, rule_set_id: &str) -> Result<()> {
        self.store.delete(rule_set_id).await?;
        self.cache.remove(rule_set_id);
        tracing::info!(rule_set = %rule_set_id, "Deleted rule set");
        Ok(())
    }

    /// Drop every cached rule set.
    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::info!("Rule engine cache cleared");
    }

    /// Number of cached rule sets.
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    // =========================================================================
    // Phase application
    // =========================================================================

    /// Apply input-phase rules to a request, producing a modified copy.
    ///
    /// Rules are evaluated against the current (possibly already-modified)
    /// request, in ascending priority order. A rule whose evaluation errors
    /// is skipped, never fatal to the chain.
    pub async fn apply_input_rules(
        &self,
        request: &GenerationRequest,
        rule_set: &RuleSet,
    ) -> GenerationRequest {
        if !rule_set.is_active {
            return request.clone();
        }

        let mut rules: Vec<&CustomRule> = rule_set
            .rules
            .iter()
            .filter(|rule| rule.is_active && rule.rule_type.applies_to_input())
            .collect();
        rules.sort_by_key(|rule| rule.priority);

        let mut modified = request.clone();
        let mut applied = Vec::new();

        for rule in rules {
            if !check_condition(&rule.condition, Some(&modified), None) {
                continue;
            }
            match apply_input_action(&rule.action, &rule.rule_id, &modified) {
                Ok(next) => {
                    tracing::debug!(rule = %rule.rule_id, "Applied input rule");
                    modified = next;
                    applied.push(rule.rule_id.clone());
                }
                Err(e) => {
                    tracing::error!(rule = %rule.rule_id, error = %e, "Error applying input rule");
                }
            }
        }

        if !applied.is_empty() {
            self.track_usage(&rule_set.rule_set_id, &applied, "input").await;
        }

        modified
    }

    /// Apply output-phase rules to a response, producing a modified copy.
    ///
    /// Fired rule ids are appended to the response's `rules_applied`.
    pub async fn apply_output_rules(
        &self,
        response: &GenerationResponse,
        rule_set: &RuleSet,
    ) -> GenerationResponse {
        if !rule_set.is_active {
            return response.clone();
        }

        let mut rules: Vec<&CustomRule> = rule_set
            .rules
            .iter()
            .filter(|rule| rule.is_active && rule.rule_type.applies_to_output())
            .collect();
        rules.sort_by_key(|rule| rule.priority);

        let mut modified = response.clone();
        let mut applied = Vec::new();

        for rule in rules {
            if !check_condition(&rule.condition, None, Some(&modified)) {
                continue;
            }
            match apply_output_action(&rule.action, &rule.rule_id, &modified) {
                Ok(next) => {
                    tracing::debug!(rule = %rule.rule_id, "Applied output rule");
                    modified = next;
                    applied.push(rule.rule_id.clone());
                }
                Err(e) => {
                    tracing::error!(rule = %rule.rule_id, error = %e, "Error applying output rule");
                }
            }
        }

        modified.rules_applied.extend(applied.iter().cloned());

        if !applied.is_empty() {
            self.track_usage(&rule_set.rule_set_id, &applied, "output").await;
        }

        modified
    }

    /// Record one usage-tracking event for a phase: bump the rule set's
    /// counters and notify subscribers. Failures here degrade to a log line.
    async fn track_usage(&self, rule_set_id: &str, rules_applied: &[String], phase: &str) {
        if let Err(e) = self.store.increment_usage(rule_set_id).await {
            tracing::error!(rule_set = %rule_set_id, error = %e, "Error tracking rule usage");
        }

        if let Some(mut cached) = self.cache.get_mut(rule_set_id) {
            cached.usage_count += 1;
            cached.last_used = Some(Utc::now());
        }

        tracing::info!(
            rule_set = %rule_set_id,
            phase = %phase,
            rules = ?rules_applied,
            "Rules fired"
        );

        if let Some(events) = &self.events {
            let event = EventEnvelope::new(
                EventType::Other("RULES_APPLIED".to_string()),
                json!({
                    "rule_set_id": rule_set_id,
                    "rules_applied": rules_applied,
                    "phase": phase,
                }),
            );
            if let Err(e) = events.publish(event).await {
                tracing::warn!(error = %e, "Rule usage event not published");
            }
        }
    }
}
