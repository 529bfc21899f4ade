//! Rule action application.
//!
//! Actions produce a copy of the input object; the caller's original is
//! never mutated. An action that does not apply to the current phase is a
//! logged no-op, so stored rule data can never break the pipeline.

use regex::{Regex, RegexBuilder};
use serde_json::json;

use modelflow_core::{
    types::{
        GenerationRequest, GenerationResponse, ResponseFormat, RuleAction, TextOperation,
    },
    Error, Result,
};

/// Default substitute for a blocked response.
const BLOCKED_MESSAGE: &str = "Content blocked by content policy";

fn apply_text_operation(
    current: &str,
    operation: TextOperation,
    text: &str,
    pattern: &Option<String>,
) -> Result<String> {
    Ok(match operation {
        TextOperation::Append => format!("{}\n{}", current, text),
        TextOperation::Prepend => format!("{}\n{}", text, current),
        TextOperation::Replace => match pattern {
            Some(pattern) => {
                let re = Regex::new(pattern)
                    .map_err(|e| Error::rule_engine(format!("Bad replace pattern: {}", e)))?;
                re.replace_all(current, text).into_owned()
            }
            None => current.to_string(),
        },
    })
}

/// Apply an action to a request during the input phase.
pub fn apply_input_action(
    action: &RuleAction,
    rule_id: &str,
    request: &GenerationRequest,
) -> Result<GenerationRequest> {
    let mut modified = request.clone();

    match action {
        RuleAction::ModifyPrompt {
            operation,
            text,
            pattern,
        } => {
            modified.prompt = apply_text_operation(&request.prompt, *operation, text, pattern)?;
        }

        RuleAction::SetParameter { parameter, value } => match parameter.as_str() {
            "temperature" => {
                if let Some(v) = value.as_f64() {
                    modified.temperature = Some(v as f32);
                }
            }
            "max_tokens" => {
                if let Some(v) = value.as_u64() {
                    modified.max_tokens = Some(v as u32);
                }
            }
            "top_p" => {
                if let Some(v) = value.as_f64() {
                    modified.top_p = Some(v as f32);
                }
            }
            "top_k" => {
                if let Some(v) = value.as_u64() {
                    modified.top_k = Some(v as u32);
                }
            }
            "preferred_model" => {
                if let Some(v) = value.as_str() {
                    modified.preferred_model = Some(v.to_string());
                }
            }
            other => {
                tracing::warn!(parameter = %other, "Unknown generation parameter, ignored");
            }
        },

        RuleAction::AddContext { key, value } => {
            modified.context.insert(key.clone(), value.clone());
        }

        // Annotate only: blocking never halts the pipeline. Callers that
        // want a hard stop inspect this flag.
        RuleAction::Block { .. } => {
            modified
                .context
                .insert("_blocked_by_rule".to_string(), json!(rule_id));
        }

        other => {
            tracing::warn!(
                rule = %rule_id,
                action = other.kind(),
                "Action not applicable to input phase, ignored"
            );
        }
    }

    Ok(modified)
}

/// Apply an action to a response during the output phase.
pub fn apply_output_action(
    action: &RuleAction,
    rule_id: &str,
    response: &GenerationResponse,
) -> Result<GenerationResponse> {
    let mut modified = response.clone();

    match action {
        RuleAction::ModifyContent {
            operation,
            text,
            pattern,
        } => {
            modified.content = apply_text_operation(&response.content, *operation, text, pattern)?;
        }

        RuleAction::Format { format } => match format {
            ResponseFormat::Markdown => {
                let content = response.content.trim();
                if !content.starts_with('#') {
                    modified.content = format!("## Response\n\n{}", content);
                }
            }
            ResponseFormat::Json => {
                modified.content = json!({ "response": response.content }).to_string();
            }
        },

        RuleAction::Filter {
            banned_words,
            replacement,
        } => {
            let mut content = response.content.clone();
            for word in banned_words {
                let re = RegexBuilder::new(&regex::escape(word))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| Error::rule_engine(format!("Bad filter word: {}", e)))?;
                content = re.replace_all(&content, replacement.as_str()).into_owned();
            }
            modified.content = content;
        }

        RuleAction::Block { message } => {
            modified.content = message
                .clone()
                .unwrap_or_else(|| BLOCKED_MESSAGE.to_string());
        }

        other => {
            tracing::warn!(
                rule = %rule_id,
                action = other.kind(),
                "Action not applicable to output phase, ignored"
            );
        }
    }

    Ok(modified)
}
