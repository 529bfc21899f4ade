//! Rule condition evaluation.
//!
//! `check_condition` is a pure, total function: it never suspends and never
//! errors. A condition referencing a target that is not available in the
//! current phase (e.g. `response` during input processing) evaluates to
//! false, and unknown condition tags log a warning and evaluate to false.

use regex::RegexBuilder;

use modelflow_core::types::{ConditionTarget, GenerationRequest, GenerationResponse, RuleCondition};

/// Resolve the text a condition reads, per its target.
fn condition_text(
    target: ConditionTarget,
    request: Option<&GenerationRequest>,
    response: Option<&GenerationResponse>,
) -> String {
    match target {
        ConditionTarget::Prompt => request.map(|r| r.prompt.clone()).unwrap_or_default(),
        ConditionTarget::Response => response.map(|r| r.content.clone()).unwrap_or_default(),
        ConditionTarget::Context => request
            .filter(|r| !r.context.is_empty())
            .map(|r| serde_json::Value::Object(r.context.clone()).to_string())
            .unwrap_or_default(),
    }
}

/// Evaluate a condition against the current request and/or response.
pub fn check_condition(
    condition: &RuleCondition,
    request: Option<&GenerationRequest>,
    response: Option<&GenerationResponse>,
) -> bool {
    match condition {
        RuleCondition::Contains { target, value } => {
            condition_text(*target, request, response).contains(value.as_str())
        }

        RuleCondition::Matches { target, pattern } => {
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) => re.is_match(&condition_text(*target, request, response)),
                Err(e) => {
                    tracing::error!(pattern = %pattern, error = %e, "Bad condition pattern");
                    false
                }
            }
        }

        RuleCondition::Equals { target, value } => {
            condition_text(*target, request, response) == *value
        }

        RuleCondition::Length {
            target,
            min_length,
            max_length,
        } => {
            let len = condition_text(*target, request, response).chars().count();
            len >= *min_length && max_length.map_or(true, |max| len <= max)
        }

        RuleCondition::Context { key, value } => request
            .map(|r| r.context.get(key) == Some(value))
            .unwrap_or(false),

        RuleCondition::Confidence { min_confidence } => response
            .and_then(|r| r.confidence_score)
            .map(|score| score >= *min_confidence)
            .unwrap_or(false),

        RuleCondition::BannedWords { target, words } => {
            let text = condition_text(*target, request, response).to_lowercase();
            words.iter().any(|word| text.contains(&word.to_lowercase()))
        }

        RuleCondition::Unknown => {
            tracing::warn!("Unknown condition type, treating as not matched");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelflow_core::types::TokenUsage;
    use serde_json::json;

    fn request_with(prompt: &str) -> GenerationRequest {
        GenerationRequest::new(prompt)
    }

    fn response_with(content: &str) -> GenerationResponse {
        let mut response =
            GenerationResponse::from_provider(content, TokenUsage::new(10, 10));
        response.confidence_score = Some(0.9);
        response
    }

    #[test]
    fn test_contains_on_prompt() {
        let condition = RuleCondition::Contains {
            target: ConditionTarget::Prompt,
            value: "refund".to_string(),
        };

        assert!(check_condition(
            &condition,
            Some(&request_with("I want a refund please")),
            None
        ));
        assert!(!check_condition(
            &condition,
            Some(&request_with("hello")),
            None
        ));
    }

    #[test]
    fn test_response_target_missing_in_input_phase() {
        let condition = RuleCondition::Contains {
            target: ConditionTarget::Response,
            value: "anything".to_string(),
        };

        // Input phase: response unavailable, condition is false, not an error
        assert!(!check_condition(&condition, Some(&request_with("anything")), None));
    }

    #[test]
    fn test_matches_case_insensitive() {
        let condition = RuleCondition::Matches {
            target: ConditionTarget::Prompt,
            pattern: r"urgent|asap".to_string(),
        };

        assert!(check_condition(&condition, Some(&request_with("This is URGENT")), None));
    }

    #[test]
    fn test_bad_pattern_is_false_not_fatal() {
        let condition = RuleCondition::Matches {
            target: ConditionTarget::Prompt,
            pattern: "(unclosed".to_string(),
        };

        assert!(!check_condition(&condition, Some(&request_with("test")), None));
    }

    #[test]
    fn test_length_range() {
        let condition = RuleCondition::Length {
            target: ConditionTarget::Prompt,
            min_length: 3,
            max_length: Some(5),
        };

        assert!(!check_condition(&condition, Some(&request_with("ab")), None));
        assert!(check_condition(&condition, Some(&request_with("abcd")), None));
        assert!(!check_condition(&condition, Some(&request_with("abcdef")), None));
    }

    #[test]
    fn test_context_equality() {
        let condition = RuleCondition::Context {
            key: "tier".to_string(),
            value: json!("premium"),
        };

        let mut request = request_with("hi");
        request.context.insert("tier".to_string(), json!("premium"));
        assert!(check_condition(&condition, Some(&request), None));

        request.context.insert("tier".to_string(), json!("basic"));
        assert!(!check_condition(&condition, Some(&request), None));
    }

    #[test]
    fn test_confidence_floor() {
        let condition = RuleCondition::Confidence {
            min_confidence: 0.8,
        };

        assert!(check_condition(&condition, None, Some(&response_with("ok"))));

        let mut low = response_with("ok");
        low.confidence_score = Some(0.5);
        assert!(!check_condition(&condition, None, Some(&low)));

        let mut none = response_with("ok");
        none.confidence_score = None;
        assert!(!check_condition(&condition, None, Some(&none)));
    }

    #[test]
    fn test_banned_words() {
        let condition = RuleCondition::BannedWords {
            target: ConditionTarget::Response,
            words: vec!["Spam".to_string()],
        };

        assert!(check_condition(&condition, None, Some(&response_with("this is SPAM"))));
        assert!(!check_condition(&condition, None, Some(&response_with("clean"))));
    }

    #[test]
    fn test_unknown_condition_is_false() {
        assert!(!check_condition(
            &RuleCondition::Unknown,
            Some(&request_with("anything")),
            None
        ));
    }

    #[test]
    fn test_unknown_tag_deserializes_to_unknown() {
        let condition: RuleCondition =
            serde_json::from_value(json!({"type": "sentiment", "value": "angry"})).unwrap();
        assert_eq!(condition, RuleCondition::Unknown);
    }
}
