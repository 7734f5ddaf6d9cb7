//! Data model shared by the engine: test case definitions,
//! environments, suites and the results produced by running them.

use crate::error::RuleDecodeError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Variables visible to placeholder substitution.
pub type VariableScope = HashMap<String, Value>;

/// A deployment target: base URL plus default variables.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Environment {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    pub base_url: String,
    /// Accepts either a mapping or a string holding a JSON object.
    #[serde(default, deserialize_with = "embedded_json")]
    pub variables: VariableScope,
}

impl Environment {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            id: None,
            name: None,
            base_url: base_url.into(),
            variables: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_variable(
        mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Name used in log lines.
    pub fn label(&self) -> String {
        match (&self.name, self.id) {
            (Some(name), Some(id)) => format!("{name} (ID: {id})"),
            (Some(name), None) => name.clone(),
            (None, Some(id)) => format!("ID: {id}"),
            (None, None) => self.base_url.clone(),
        }
    }
}

/// HTTP methods a test case may use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    /// Only these methods ever carry a request body.
    pub fn sends_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        };
        f.write_str(name)
    }
}

/// Encoding used for the request body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum BodyFormat {
    #[default]
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "form-data")]
    FormData,
}

/// A declarative HTTP request plus the expectations on its response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: String,
    pub method: HttpMethod,
    /// URL template relative to the environment's base URL.
    #[serde(default)]
    pub url: String,
    #[serde(default, deserialize_with = "header_map")]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub body_format: BodyFormat,
    #[serde(default = "default_status_code")]
    pub expected_status_code: u16,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub extract_params: Vec<ExtractParam>,
}

fn default_status_code() -> u16 {
    200
}

impl TestCase {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            id: None,
            name: String::new(),
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            body_format: BodyFormat::Json,
            expected_status_code: default_status_code(),
            validation_rules: Vec::new(),
            extract_params: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value, format: BodyFormat) -> Self {
        self.body = Some(body);
        self.body_format = format;
        self
    }

    pub fn expect_status(mut self, status: u16) -> Self {
        self.expected_status_code = status;
        self
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.validation_rules.push(rule);
        self
    }

    pub fn extract(
        mut self,
        name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        self.extract_params.push(ExtractParam {
            name: name.into(),
            path: path.into(),
        });
        self
    }

    /// Deserialize a case from its JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Name used in log lines.
    pub fn label(&self) -> String {
        match self.id {
            Some(id) => format!("{} (ID: {id})", self.name),
            None => self.name.clone(),
        }
    }
}

/// Comparators understood by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equal,
    Contains,
}

impl Comparator {
    /// Parse the key of a wire-format rule object.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "Equal" | "eq" | "equals" => Some(Self::Equal),
            "contains" => Some(Self::Contains),
            _ => None,
        }
    }

    /// Key written back when serializing a rule.
    pub fn key(self) -> &'static str {
        match self {
            Self::Equal => "Equal",
            Self::Contains => "contains",
        }
    }

    /// Name stored in validator records.
    pub fn record_name(self) -> &'static str {
        match self {
            Self::Equal => "eq",
            Self::Contains => "contains",
        }
    }
}

/// One assertion, decoded from `{"<comparator>": [path, expected]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ValidationRule {
    pub comparator: Comparator,
    pub path: String,
    pub expected: Value,
}

impl ValidationRule {
    pub fn equal(path: impl Into<String>, expected: impl Into<Value>) -> Self {
        Self {
            comparator: Comparator::Equal,
            path: path.into(),
            expected: expected.into(),
        }
    }

    pub fn contains(
        path: impl Into<String>,
        expected: impl Into<Value>,
    ) -> Self {
        Self {
            comparator: Comparator::Contains,
            path: path.into(),
            expected: expected.into(),
        }
    }
}

impl TryFrom<Value> for ValidationRule {
    type Error = RuleDecodeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(map) = value else {
            return Err(RuleDecodeError::NotAnObject(value.to_string()));
        };

        let (comparator, payload) = map
            .iter()
            .find_map(|(key, payload)| {
                Comparator::from_key(key).map(|c| (c, payload))
            })
            .ok_or_else(|| {
                RuleDecodeError::UnknownComparator(
                    map.keys().cloned().collect::<Vec<_>>().join(", "),
                )
            })?;

        match payload {
            Value::Array(items) if items.len() == 2 => {
                let path = match &items[0] {
                    Value::String(path) => path.clone(),
                    other => other.to_string(),
                };
                Ok(Self {
                    comparator,
                    path,
                    expected: items[1].clone(),
                })
            }
            other => Err(RuleDecodeError::MalformedPayload {
                comparator: comparator.key(),
                payload: other.to_string(),
            }),
        }
    }
}

impl From<ValidationRule> for Value {
    fn from(rule: ValidationRule) -> Self {
        let mut map = Map::new();
        map.insert(
            rule.comparator.key().to_string(),
            Value::Array(vec![Value::String(rule.path), rule.expected]),
        );
        Value::Object(map)
    }
}

/// Names a value to pull out of the response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractParam {
    #[serde(default)]
    pub name: String,
    /// JSONPath expression evaluated against the parsed body.
    #[serde(default)]
    pub path: String,
}

impl TryFrom<Value> for ExtractParam {
    type Error = serde_json::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        serde_json::from_value(value)
    }
}

/// A body that is either structured JSON or opaque text.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Json(Value),
    Text(String),
}

impl ParseOutcome {
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str(text) {
            Ok(json) => Self::Json(json),
            Err(_) => Self::Text(text.to_string()),
        }
    }

    /// Strings are parsed as JSON when possible; any other value is
    /// already structured.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(text) => Self::parse(text),
            other => Self::Json(other.clone()),
        }
    }

    /// Text becomes a JSON string.
    pub fn into_value(self) -> Value {
        match self {
            Self::Json(json) => json,
            Self::Text(text) => Value::String(text),
        }
    }

    /// Text is wrapped as `{"content": text}` so JSONPath queries
    /// still have an object to walk.
    pub fn into_wrapped(self) -> Value {
        match self {
            Self::Json(json) => json,
            Self::Text(text) => {
                let mut map = Map::new();
                map.insert("content".to_string(), Value::String(text));
                Value::Object(map)
            }
        }
    }
}

/// Final state of one executed case.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Failed,
    Error,
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CheckResult {
    #[serde(rename = "pass")]
    Pass,
    #[serde(rename = "failed")]
    Failed,
}

/// Audit entry for one evaluated assertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidatorRecord {
    pub check: String,
    pub expect: Value,
    pub comparator: String,
    pub check_value: Value,
    pub check_result: CheckResult,
}

/// Outcome of executing a single test case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub status: CaseStatus,
    /// Headers as written in the case, before substitution.
    pub request_headers: HashMap<String, String>,
    /// Body as written in the case, before substitution.
    pub request_body: Option<Value>,
    pub response_status_code: Option<u16>,
    pub response_headers: HashMap<String, String>,
    pub response_body: Option<Value>,
    pub response_time_ms: f64,
    pub error_message: String,
    pub extracted_params: VariableScope,
    pub validators: Vec<ValidatorRecord>,
}

impl ExecutionResult {
    /// A result for a case that never produced a usable response.
    pub fn error(
        request_headers: HashMap<String, String>,
        request_body: Option<Value>,
        message: impl Into<String>,
        response_time_ms: f64,
    ) -> Self {
        Self {
            status: CaseStatus::Error,
            request_headers,
            request_body,
            response_status_code: None,
            response_headers: HashMap::new(),
            response_body: None,
            response_time_ms,
            error_message: message.into(),
            extracted_params: HashMap::new(),
            validators: Vec::new(),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == CaseStatus::Passed
    }
}

/// One ordered entry of a suite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuiteCase {
    #[serde(flatten)]
    pub case: TestCase,
    #[serde(default)]
    pub order: i64,
    /// Environment pinned on the suite/case association. Wins over
    /// every other environment source.
    #[serde(default)]
    pub environment: Option<Environment>,
}

impl SuiteCase {
    pub fn new(case: TestCase) -> Self {
        Self {
            case,
            order: 0,
            environment: None,
        }
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }
}

/// An ordered collection of cases sharing one variable scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestSuite {
    pub name: String,
    #[serde(default)]
    pub cases: Vec<SuiteCase>,
}

impl TestSuite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cases: Vec::new(),
        }
    }

    pub fn with_case(mut self, case: SuiteCase) -> Self {
        self.cases.push(case);
        self
    }

    /// Cases sorted by `order`; ties keep declaration order.
    pub fn ordered_cases(&self) -> Vec<&SuiteCase> {
        let mut cases: Vec<&SuiteCase> = self.cases.iter().collect();
        cases.sort_by_key(|case| case.order);
        cases
    }
}

/// A case result tagged with what it ran against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseRunResult {
    pub case_id: Option<u64>,
    pub case_name: String,
    pub environment_id: Option<u64>,
    #[serde(flatten)]
    pub result: ExecutionResult,
}

/// Pass/fail counts over a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
}

impl RunSummary {
    pub fn from_results<'a>(
        results: impl IntoIterator<Item = &'a ExecutionResult>,
    ) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.total += 1;
            match result.status {
                CaseStatus::Passed => summary.passed += 1,
                CaseStatus::Failed => summary.failed += 1,
                CaseStatus::Error => summary.errored += 1,
            }
        }
        summary
    }

    pub fn success(&self) -> bool {
        self.passed == self.total
    }

    pub fn status(&self) -> RunStatus {
        if self.success() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Result of running a whole suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteRunResult {
    pub suite_name: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub summary: RunSummary,
    pub results: Vec<CaseRunResult>,
}

impl SuiteRunResult {
    /// `false` as soon as any case did not pass.
    pub fn success(&self) -> bool {
        self.summary.success()
    }

    pub fn status(&self) -> RunStatus {
        self.summary.status()
    }
}

/// Render a variable value as text: strings verbatim, null as the
/// empty string, everything else in its compact JSON spelling.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Decode a container that may also arrive as a JSON-encoded string.
/// Anything undecodable is logged and replaced by the default.
fn decode_embedded<T>(raw: Value, what: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let raw = match raw {
        Value::Null => return T::default(),
        Value::String(text) => match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("Invalid {} format: {} ({})", what, text, err);
                return T::default();
            }
        },
        other => other,
    };

    serde_json::from_value(raw).unwrap_or_else(|err| {
        warn!("Invalid {} format: {}", what, err);
        T::default()
    })
}

fn embedded_json<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(decode_embedded(raw, "mapping"))
}

fn header_map<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    let headers: HashMap<String, Value> = decode_embedded(raw, "headers");
    Ok(headers
        .into_iter()
        .map(|(name, value)| (name, value_to_string(&value)))
        .collect())
}

/// Decode a sequence leniently: the sequence itself or any element may
/// be a JSON-encoded string, and elements that fail to decode are
/// logged and dropped instead of failing the whole case.
fn lenient_seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<Value>,
    T::Error: fmt::Display,
{
    let raw = Value::deserialize(deserializer)?;
    let items: Vec<Value> = decode_embedded(raw, "sequence");

    Ok(items
        .into_iter()
        .filter_map(|item| {
            let item = match item {
                Value::String(text) => match serde_json::from_str(&text) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        warn!("Skipping invalid entry {}: {}", text, err);
                        return None;
                    }
                },
                other => other,
            };
            T::try_from(item)
                .map_err(|err| warn!("Skipping invalid entry: {}", err))
                .ok()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_case_wire_format_defaults() {
        let case = TestCase::from_json(
            r#"{"method": "GET", "url": "/ping"}"#,
        )
        .unwrap();

        assert_eq!(case.method, HttpMethod::Get);
        assert_eq!(case.expected_status_code, 200);
        assert_eq!(case.body_format, BodyFormat::Json);
        assert!(case.headers.is_empty());
        assert!(case.validation_rules.is_empty());
        assert!(case.body.is_none());
    }

    #[test]
    fn test_rules_decode_into_tagged_variants() {
        let case = TestCase::from_json(
            r#"{
                "method": "POST",
                "url": "/items",
                "body_format": "form-data",
                "validation_rules": [
                    {"Equal": ["status_code", 201]},
                    {"contains": ["$.msg", "ok"]},
                    {"eq": ["$.id", 7]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(case.body_format, BodyFormat::FormData);
        assert_eq!(
            case.validation_rules,
            vec![
                ValidationRule::equal("status_code", 201),
                ValidationRule::contains("$.msg", "ok"),
                ValidationRule::equal("$.id", 7),
            ]
        );
    }

    #[test]
    fn test_unknown_and_malformed_rules_are_dropped() {
        let case = TestCase::from_json(
            r#"{
                "method": "GET",
                "url": "/",
                "validation_rules": [
                    {"regex": ["$.a", "^x"]},
                    {"Equal": ["$.a"]},
                    "not json",
                    {"contains": ["content", "pong"]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(
            case.validation_rules,
            vec![ValidationRule::contains("content", "pong")]
        );
    }

    #[test]
    fn test_string_encoded_fields_are_decoded() {
        let case: TestCase = serde_json::from_value(json!({
            "method": "GET",
            "url": "/",
            "headers": "{\"X-Token\": \"${token}\", \"X-Retry\": 3}",
            "extract_params": "[{\"name\": \"id\", \"path\": \"$.id\"}]",
            "validation_rules": ["{\"Equal\": [\"status_code\", 200]}"]
        }))
        .unwrap();

        assert_eq!(case.headers["X-Token"], "${token}");
        assert_eq!(case.headers["X-Retry"], "3");
        assert_eq!(
            case.extract_params,
            vec![ExtractParam {
                name: "id".into(),
                path: "$.id".into()
            }]
        );
        assert_eq!(case.validation_rules.len(), 1);
    }

    #[test]
    fn test_invalid_embedded_headers_fall_back_to_empty() {
        let case: TestCase = serde_json::from_value(json!({
            "method": "GET",
            "url": "/",
            "headers": "{not json"
        }))
        .unwrap();
        assert!(case.headers.is_empty());
    }

    #[test]
    fn test_environment_variables_from_string() {
        let env: Environment = serde_json::from_value(json!({
            "base_url": "http://x",
            "variables": "{\"user\": \"alice\", \"retries\": 2}"
        }))
        .unwrap();
        assert_eq!(env.variables["user"], json!("alice"));
        assert_eq!(env.variables["retries"], json!(2));
    }

    #[test]
    fn test_rule_serializes_back_to_wire_form() {
        let value = Value::from(ValidationRule::contains("text", "ok"));
        assert_eq!(value, json!({"contains": ["text", "ok"]}));
    }

    #[test]
    fn test_parse_outcome_wraps_text() {
        assert_eq!(
            ParseOutcome::parse("plain").into_wrapped(),
            json!({"content": "plain"})
        );
        assert_eq!(
            ParseOutcome::parse(r#"{"a": 1}"#).into_wrapped(),
            json!({"a": 1})
        );
        assert_eq!(
            ParseOutcome::from_value(&json!("{\"v\": 1}")),
            ParseOutcome::Json(json!({"v": 1}))
        );
    }

    #[test]
    fn test_ordered_cases_is_stable() {
        let suite = TestSuite::new("s")
            .with_case(
                SuiteCase::new(TestCase::new(HttpMethod::Get, "/b").with_id(2))
                    .with_order(1),
            )
            .with_case(
                SuiteCase::new(TestCase::new(HttpMethod::Get, "/a").with_id(1))
                    .with_order(0),
            )
            .with_case(
                SuiteCase::new(TestCase::new(HttpMethod::Get, "/c").with_id(3))
                    .with_order(1),
            );

        let ids: Vec<Option<u64>> =
            suite.ordered_cases().iter().map(|c| c.case.id).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn test_summary_counts_statuses() {
        let ok = ExecutionResult {
            status: CaseStatus::Passed,
            ..ExecutionResult::error(HashMap::new(), None, "", 0.0)
        };
        let failed = ExecutionResult {
            status: CaseStatus::Failed,
            ..ok.clone()
        };
        let errored = ExecutionResult::error(HashMap::new(), None, "x", 0.0);

        let summary = RunSummary::from_results([&ok, &failed, &errored]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.status(), RunStatus::Failed);

        let all_ok = RunSummary::from_results([&ok]);
        assert_eq!(all_ok.status(), RunStatus::Completed);
    }
}
