//! Rule validation at create/update time.
//!
//! Violations reject the write before anything is persisted; they are never
//! silently coerced.

use modelflow_core::{
    types::{CustomRule, RuleAction, RuleType},
    Error, Result,
};

const INPUT_ACTIONS: &[&str] = &["modify_prompt", "set_parameter", "add_context", "block"];
const OUTPUT_ACTIONS: &[&str] = &["modify_content", "format", "filter", "block"];

/// Condition tags allowed for a rule type. `None` means any known condition.
fn allowed_conditions(rule_type: RuleType) -> Option<&'static [&'static str]> {
    match rule_type {
        // Input filter rules check request properties
        RuleType::InputFilter => Some(&["contains", "matches", "equals", "length", "context"]),
        // Output filter rules check response properties
        RuleType::OutputFilter => Some(&["contains", "matches", "equals", "length", "confidence"]),
        // Content moderation applies to both phases
        RuleType::ContentModeration => Some(&["contains", "matches", "banned_words"]),
        _ => None,
    }
}

/// Action tags allowed for a rule type.
fn allowed_actions(rule_type: RuleType) -> &'static [&'static str] {
    match rule_type {
        RuleType::InputFilter | RuleType::PromptEnhancement | RuleType::CostOptimization => {
            INPUT_ACTIONS
        }
        RuleType::OutputFilter | RuleType::ResponseFormatting => OUTPUT_ACTIONS,
        RuleType::ContentModeration => &[
            "modify_prompt",
            "add_context",
            "modify_content",
            "filter",
            "block",
        ],
    }
}

/// Validate a rule's structure against its declared type.
pub fn validate_rule(rule: &CustomRule) -> Result<()> {
    if rule.condition.kind() == "unknown" {
        return Err(Error::validation(format!(
            "Rule {} condition must carry a known 'type'",
            rule.rule_id
        )));
    }

    if matches!(rule.action, RuleAction::Unknown) {
        return Err(Error::validation(format!(
            "Rule {} action must carry a known 'type'",
            rule.rule_id
        )));
    }

    if let Some(allowed) = allowed_conditions(rule.rule_type) {
        let kind = rule.condition.kind();
        if !allowed.contains(&kind) {
            return Err(Error::validation(format!(
                "Invalid condition type for {:?}: {}",
                rule.rule_type, kind
            )));
        }
    }

    let action_kind = rule.action.kind();
    if !allowed_actions(rule.rule_type).contains(&action_kind) {
        return Err(Error::validation(format!(
            "Invalid action type for {:?}: {}",
            rule.rule_type, action_kind
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use modelflow_core::types::{ConditionTarget, RuleCondition};
    use serde_json::json;

    fn rule(rule_type: RuleType, condition: RuleCondition, action: RuleAction) -> CustomRule {
        CustomRule {
            rule_id: "r1".to_string(),
            name: "test".to_string(),
            description: None,
            rule_type,
            condition,
            action,
            priority: 100,
            is_active: true,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_valid_input_filter() {
        let r = rule(
            RuleType::InputFilter,
            RuleCondition::Contains {
                target: ConditionTarget::Prompt,
                value: "x".to_string(),
            },
            RuleAction::AddContext {
                key: "k".to_string(),
                value: json!(true),
            },
        );
        assert!(validate_rule(&r).is_ok());
    }

    #[test]
    fn test_input_filter_rejects_confidence_condition() {
        // Confidence exists only on responses
        let r = rule(
            RuleType::InputFilter,
            RuleCondition::Confidence { min_confidence: 0.5 },
            RuleAction::Block { message: None },
        );
        assert!(matches!(validate_rule(&r), Err(Error::Validation(_))));
    }

    #[test]
    fn test_unknown_condition_rejected() {
        let r = rule(
            RuleType::PromptEnhancement,
            RuleCondition::Unknown,
            RuleAction::Block { message: None },
        );
        assert!(matches!(validate_rule(&r), Err(Error::Validation(_))));
    }

    #[test]
    fn test_output_rule_rejects_input_action() {
        let r = rule(
            RuleType::ResponseFormatting,
            RuleCondition::Contains {
                target: ConditionTarget::Response,
                value: "x".to_string(),
            },
            RuleAction::AddContext {
                key: "k".to_string(),
                value: json!(1),
            },
        );
        assert!(matches!(validate_rule(&r), Err(Error::Validation(_))));
    }

    #[test]
    fn test_content_moderation_accepts_banned_words() {
        let r = rule(
            RuleType::ContentModeration,
            RuleCondition::BannedWords {
                target: ConditionTarget::Prompt,
                words: vec!["bad".to_string()],
            },
            RuleAction::Block { message: None },
        );
        assert!(validate_rule(&r).is_ok());
    }
}
