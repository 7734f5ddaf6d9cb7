//! Evaluation of declarative assertions against a response.

use crate::extractor::select_first;
use crate::model::{
    value_to_string, CheckResult, Comparator, ValidationRule, ValidatorRecord,
    VariableScope,
};
use crate::substitution::substitute;
use serde_json::Value;
use tracing::{debug, warn};

/// Longest `check_value` kept in a `contains` record, in characters.
const CHECK_VALUE_LIMIT: usize = 100;

/// The parts of a response the validator can look at.
#[derive(Debug, Clone, Copy)]
pub struct ResponseView<'a> {
    pub status: u16,
    /// Raw response text.
    pub text: &'a str,
    /// Parsed body; non-JSON text arrives wrapped as `{"content": ..}`.
    pub body: &'a Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationOutcome {
    pub success: bool,
    pub errors: Vec<String>,
    pub records: Vec<ValidatorRecord>,
}

/// What a rule's path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckTarget<'a> {
    StatusCode,
    Text,
    JsonPath(&'a str),
    Unsupported,
}

impl<'a> CheckTarget<'a> {
    fn parse(path: &'a str) -> Self {
        match path {
            "status_code" => Self::StatusCode,
            "content" | "text" => Self::Text,
            p if p.starts_with("$.") => Self::JsonPath(p),
            _ => Self::Unsupported,
        }
    }
}

/// Evaluate every rule. There is no short-circuit: each rule yields one
/// record whether it passes or not.
pub fn validate(
    rules: &[ValidationRule],
    response: &ResponseView<'_>,
    scope: &VariableScope,
) -> ValidationOutcome {
    let mut outcome = ValidationOutcome {
        success: true,
        ..Default::default()
    };

    for rule in rules {
        let expected = substitute(&rule.expected, scope);
        let (record, error) = match rule.comparator {
            Comparator::Equal => check_equal(rule, expected, response),
            Comparator::Contains => check_contains(rule, expected, response),
        };

        debug!(
            "Validator {} {} -> {:?}",
            rule.comparator.record_name(),
            rule.path,
            record.check_result
        );

        if let Some(error) = error {
            outcome.success = false;
            outcome.errors.push(error);
        }
        outcome.records.push(record);
    }

    outcome
}

fn check_equal(
    rule: &ValidationRule,
    expected: Value,
    response: &ResponseView<'_>,
) -> (ValidatorRecord, Option<String>) {
    let actual = match CheckTarget::parse(&rule.path) {
        CheckTarget::StatusCode => Value::from(response.status),
        CheckTarget::JsonPath(path) => select_first(response.body, path)
            .unwrap_or_else(|err| {
                warn!("Error evaluating JSONPath {}: {}", path, err);
                None
            })
            .unwrap_or(Value::Null),
        CheckTarget::Text | CheckTarget::Unsupported => Value::Null,
    };

    let passed = values_equal(&actual, &expected);
    let error = (!passed).then(|| {
        format!(
            "Validation failed: expected {} to be {}, got {}",
            rule.path,
            describe(&expected),
            describe(&actual)
        )
    });

    let record = ValidatorRecord {
        check: rule.path.clone(),
        expect: expected,
        comparator: rule.comparator.record_name().to_string(),
        check_value: actual,
        check_result: result_tag(passed),
    };
    (record, error)
}

fn check_contains(
    rule: &ValidationRule,
    expected: Value,
    response: &ResponseView<'_>,
) -> (ValidatorRecord, Option<String>) {
    // A null needle would stringify to "" and match everything.
    if expected.is_null() {
        let record = ValidatorRecord {
            check: rule.path.clone(),
            expect: expected,
            comparator: rule.comparator.record_name().to_string(),
            check_value: Value::Null,
            check_result: CheckResult::Failed,
        };
        let error = format!(
            "Validation failed: expected value for {} is null",
            rule.path
        );
        return (record, Some(error));
    }

    let needle = value_to_string(&expected);

    let (check_value, passed, error) = match CheckTarget::parse(&rule.path) {
        CheckTarget::Text => {
            let passed = response.text.contains(&needle);
            let error = format!(
                "Validation failed: expected response to contain '{needle}'"
            );
            (
                Value::String(truncate(response.text)),
                passed,
                (!passed).then_some(error),
            )
        }
        CheckTarget::StatusCode => {
            let actual = response.status.to_string();
            let passed = actual.contains(&needle);
            (
                Value::String(actual),
                passed,
                (!passed).then(|| contains_error(&rule.path, &needle)),
            )
        }
        CheckTarget::JsonPath(path) => match select_first(response.body, path) {
            Ok(Some(actual)) if !actual.is_null() => {
                let text = value_to_string(&actual);
                let passed = text.contains(&needle);
                (
                    Value::String(truncate(&text)),
                    passed,
                    (!passed).then(|| contains_error(path, &needle)),
                )
            }
            Ok(_) => (
                Value::Null,
                false,
                Some(contains_error(path, &needle)),
            ),
            Err(err) => {
                warn!("Error evaluating JSONPath {}: {}", path, err);
                (
                    Value::Null,
                    false,
                    Some(format!(
                        "Validation failed: could not evaluate {path}"
                    )),
                )
            }
        },
        CheckTarget::Unsupported => (
            Value::Null,
            false,
            Some(contains_error(&rule.path, &needle)),
        ),
    };

    let record = ValidatorRecord {
        check: rule.path.clone(),
        expect: expected,
        comparator: rule.comparator.record_name().to_string(),
        check_value,
        check_result: result_tag(passed),
    };
    (record, error)
}

fn contains_error(path: &str, needle: &str) -> String {
    format!("Validation failed: expected {path} to contain '{needle}'")
}

fn result_tag(passed: bool) -> CheckResult {
    if passed {
        CheckResult::Pass
    } else {
        CheckResult::Failed
    }
}

/// Type-sensitive equality, except that numbers compare by value so an
/// integer status matches the same float.
fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => {
            a == b || matches!((a.as_f64(), b.as_f64()), (Some(x), Some(y)) if x == y)
        }
        _ => actual == expected,
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        other => value_to_string(other),
    }
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(CHECK_VALUE_LIMIT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
