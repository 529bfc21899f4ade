use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Custom Rule Types
// =============================================================================

/// Categories of rules that can be applied around a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    InputFilter,
    OutputFilter,
    ContentModeration,
    PromptEnhancement,
    ResponseFormatting,
    CostOptimization,
}

impl RuleType {
    /// Rule types evaluated during the input phase.
    pub fn applies_to_input(&self) -> bool {
        matches!(
            self,
            Self::InputFilter
                | Self::ContentModeration
                | Self::PromptEnhancement
                | Self::CostOptimization
        )
    }

    /// Rule types evaluated during the output phase.
    pub fn applies_to_output(&self) -> bool {
        matches!(
            self,
            Self::OutputFilter | Self::ContentModeration | Self::ResponseFormatting
        )
    }
}

/// Where a textual condition reads its subject from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionTarget {
    #[default]
    Prompt,
    Response,
    Context,
}

/// A rule condition.
///
/// Rule definitions are data: the union is closed at compile time, but the
/// `Unknown` variant absorbs unrecognized tags from stored definitions so
/// evaluation can degrade to "did not fire" instead of failing the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Target text contains a substring.
    Contains {
        #[serde(default)]
        target: ConditionTarget,
        value: String,
    },
    /// Target text matches a regex (case-insensitive).
    Matches {
        #[serde(default)]
        target: ConditionTarget,
        pattern: String,
    },
    /// Target text equals a value exactly.
    Equals {
        #[serde(default)]
        target: ConditionTarget,
        value: String,
    },
    /// Target text length falls within an inclusive range.
    Length {
        #[serde(default)]
        target: ConditionTarget,
        #[serde(default)]
        min_length: usize,
        #[serde(default)]
        max_length: Option<usize>,
    },
    /// A request context key equals a value.
    Context { key: String, value: Value },
    /// Response confidence is at or above a floor.
    Confidence { min_confidence: f32 },
    /// Target text contains any of the listed words (case-insensitive).
    BannedWords {
        #[serde(default)]
        target: ConditionTarget,
        words: Vec<String>,
    },
    /// Unrecognized condition tag from stored data.
    #[serde(other)]
    Unknown,
}

impl RuleCondition {
    /// Stable tag name, used for validation allow-lists and logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Contains { .. } => "contains",
            Self::Matches { .. } => "matches",
            Self::Equals { .. } => "equals",
            Self::Length { .. } => "length",
            Self::Context { .. } => "context",
            Self::Confidence { .. } => "confidence",
            Self::BannedWords { .. } => "banned_words",
            Self::Unknown => "unknown",
        }
    }
}

/// How a text-modifying action combines its text with the existing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextOperation {
    #[default]
    Append,
    Prepend,
    Replace,
}

/// Output formatting targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Markdown,
    Json,
}

/// A rule action.
///
/// Actions always produce a copy of their input object; they never mutate
/// the caller's original. The `block` action annotates (input) or substitutes
/// display content (output); it does not halt the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    /// Modify the request prompt (input phase).
    ModifyPrompt {
        #[serde(default)]
        operation: TextOperation,
        #[serde(default)]
        text: String,
        /// Regex to replace when `operation` is `replace`.
        #[serde(default)]
        pattern: Option<String>,
    },
    /// Override a generation parameter (input phase).
    SetParameter { parameter: String, value: Value },
    /// Add a key to the request context (input phase).
    AddContext { key: String, value: Value },
    /// Modify the response content (output phase).
    ModifyContent {
        #[serde(default)]
        operation: TextOperation,
        #[serde(default)]
        text: String,
        #[serde(default)]
        pattern: Option<String>,
    },
    /// Reformat the response content (output phase).
    Format { format: ResponseFormat },
    /// Replace banned words in the response (output phase).
    Filter {
        banned_words: Vec<String>,
        #[serde(default = "default_replacement")]
        replacement: String,
    },
    /// Annotate the request / substitute the response content.
    Block {
        #[serde(default)]
        message: Option<String>,
    },
    /// Unrecognized action tag from stored data.
    #[serde(other)]
    Unknown,
}

fn default_replacement() -> String {
    "[FILTERED]".to_string()
}

impl RuleAction {
    /// Stable tag name, used for validation allow-lists and logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModifyPrompt { .. } => "modify_prompt",
            Self::SetParameter { .. } => "set_parameter",
            Self::AddContext { .. } => "add_context",
            Self::ModifyContent { .. } => "modify_content",
            Self::Format { .. } => "format",
            Self::Filter { .. } => "filter",
            Self::Block { .. } => "block",
            Self::Unknown => "unknown",
        }
    }
}

/// An individual custom rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomRule {
    pub rule_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub rule_type: RuleType,

    pub condition: RuleCondition,
    pub action: RuleAction,

    /// Lower value = evaluated first.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_priority() -> i32 {
    100
}

fn default_true() -> bool {
    true
}

/// A named, ordered collection of rules applied together.
///
/// Rules are evaluated in non-decreasing priority order regardless of
/// insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub rule_set_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub rules: Vec<CustomRule>,

    #[serde(default = "default_true")]
    pub is_active: bool,
    /// When set, restricts the rule set to these model ids.
    #[serde(default)]
    pub applies_to_models: Option<Vec<String>>,

    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

impl RuleSet {
    /// Create an empty active rule set.
    pub fn new(rule_set_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            rule_set_id: rule_set_id.into(),
            name: name.into(),
            description: None,
            rules: Vec::new(),
            is_active: true,
            applies_to_models: None,
            created_by: None,
            created_at: now,
            updated_at: now,
            usage_count: 0,
            last_used: None,
        }
    }

    /// Add a rule.
    pub fn with_rule(mut self, rule: CustomRule) -> Self {
        self.rules.push(rule);
        self
    }
}
