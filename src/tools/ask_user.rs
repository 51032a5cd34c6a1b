//! The built-in `ask_user` clarification tool.
//!
//! Calling it pauses the tool loop: the gateway emits a clarification
//! event, finishes the stream, and treats the next user message as the
//! pending call's result. Nothing waits server-side. A conversation gets
//! at most [`MAX_CLARIFICATIONS`] of these; past the cap the model
//! receives an error result instead.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const ASK_USER_TOOL_ID: &str = "ask_user";
pub const MAX_CLARIFICATIONS: usize = 10;

const MAX_QUESTION_CHARS: usize = 500;
const MAX_OPTIONS: usize = 20;
const MAX_OPTION_CHARS: usize = 100;
const MAX_PATTERN_CHARS: usize = 200;

/// A validated clarification request ready to send to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClarificationRequest {
    pub question: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ClarificationOption>,
    /// Input validation pattern applied client-side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(rename = "allowFreeText", default)]
    pub allow_free_text: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClarificationOption {
    pub label: String,
    pub value: String,
}

/// JSON Schema for the tool's arguments.
pub fn parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "question": {"type": "string"},
            "options": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "label": {"type": "string"},
                        "value": {"type": "string"}
                    },
                    "required": ["label", "value"]
                }
            },
            "pattern": {"type": "string"},
            "allowFreeText": {"type": "boolean"}
        },
        "required": ["question"]
    })
}

pub fn description() -> &'static str {
    "Ask the user a clarifying question before continuing. Provide short \
     answer options where possible; the user's reply is returned as the \
     tool result."
}

/// Validate raw arguments into a clarification request.
pub fn validate(args: &Value) -> Result<ClarificationRequest, String> {
    let request: ClarificationRequest = serde_json::from_value(args.clone())
        .map_err(|err| format!("malformed clarification arguments: {}", err))?;

    if request.question.trim().is_empty() {
        return Err("question must not be empty".to_string());
    }
    if request.question.chars().count() > MAX_QUESTION_CHARS {
        return Err(format!(
            "question exceeds {} characters",
            MAX_QUESTION_CHARS
        ));
    }
    if request.options.len() > MAX_OPTIONS {
        return Err(format!("at most {} options are allowed", MAX_OPTIONS));
    }
    for option in &request.options {
        if option.label.chars().count() > MAX_OPTION_CHARS
            || option.value.chars().count() > MAX_OPTION_CHARS
        {
            return Err(format!(
                "option fields exceed {} characters",
                MAX_OPTION_CHARS
            ));
        }
    }
    if let Some(pattern) = &request.pattern {
        if pattern.chars().count() > MAX_PATTERN_CHARS {
            return Err(format!(
                "pattern exceeds {} characters",
                MAX_PATTERN_CHARS
            ));
        }
        if pattern_looks_catastrophic(pattern) {
            return Err("pattern rejected: nested quantifiers".to_string());
        }
    }

    Ok(request)
}

/// Reject regex shapes known to backtrack catastrophically: a quantifier
/// applied to a group whose body itself contains a quantifier, e.g.
/// `(a+)+` or `(\w*)*`, and quantified alternations like `(a|aa)+`.
fn pattern_looks_catastrophic(pattern: &str) -> bool {
    let chars: Vec<char> = pattern.chars().collect();
    let mut stack: Vec<(usize, bool, bool)> = Vec::new(); // (start, has_quantifier, has_alternation)
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '(' => stack.push((i, false, false)),
            '*' | '+' => {
                if let Some(top) = stack.last_mut() {
                    top.1 = true;
                }
            }
            '{' => {
                if let Some(top) = stack.last_mut() {
                    top.1 = true;
                }
            }
            '|' => {
                if let Some(top) = stack.last_mut() {
                    top.2 = true;
                }
            }
            ')' => {
                let Some((_, inner_quantified, inner_alternation)) = stack.pop() else {
                    continue;
                };
                let quantified_group = matches!(
                    chars.get(i + 1),
                    Some('*') | Some('+') | Some('{')
                );
                if quantified_group && (inner_quantified || inner_alternation) {
                    return true;
                }
                // Quantifiers inside survive into the enclosing group.
                if let Some(top) = stack.last_mut() {
                    top.1 |= inner_quantified;
                    top.2 |= inner_alternation;
                }
            }
            _ => {}
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_question_validates() {
        let request = validate(&json!({"question": "Which file?"})).unwrap();
        assert_eq!(request.question, "Which file?");
        assert!(request.options.is_empty());
    }

    #[test]
    fn test_question_length_cap() {
        let long = "x".repeat(501);
        assert!(validate(&json!({ "question": long })).is_err());
        let ok = "x".repeat(500);
        assert!(validate(&json!({ "question": ok })).is_ok());
    }

    #[test]
    fn test_option_count_and_length_caps() {
        let options: Vec<Value> = (0..21)
            .map(|i| json!({"label": format!("l{}", i), "value": format!("v{}", i)}))
            .collect();
        assert!(validate(&json!({"question": "q", "options": options})).is_err());

        let long_label = json!({"question": "q", "options": [
            {"label": "y".repeat(101), "value": "v"}
        ]});
        assert!(validate(&long_label).is_err());
    }

    #[test]
    fn test_pattern_length_cap() {
        let pattern = "a".repeat(201);
        assert!(validate(&json!({"question": "q", "pattern": pattern})).is_err());
    }

    #[test]
    fn test_catastrophic_patterns_rejected() {
        for bad in ["(a+)+", "(a*)*", "(\\w+)*$", "((ab)*)+", "(a|aa)+"] {
            assert!(
                validate(&json!({"question": "q", "pattern": bad})).is_err(),
                "should reject {}",
                bad
            );
        }
    }

    #[test]
    fn test_reasonable_patterns_pass() {
        for good in ["^[a-z]+$", "\\d{4}-\\d{2}-\\d{2}", "(yes|no)", "^v\\d+\\.\\d+$"] {
            assert!(
                validate(&json!({"question": "q", "pattern": good})).is_ok(),
                "should accept {}",
                good
            );
        }
    }
}
