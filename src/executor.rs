//! Execution of a single test case.

use crate::error::ExecutionError;
use crate::extractor::extract;
use crate::model::*;
use crate::substitution::{substitute, substitute_headers, substitute_str};
use crate::validator::{validate, ResponseView};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method as ReqMethod};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};
use url::Url;

const JSON_CONTENT_TYPE: &str = "application/json";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// HTTP settings for one executor. Every executor builds its own
/// client from this, so concurrent runs never share settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Whole-request timeout.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("easyrunner/{}", crate::VERSION),
        }
    }
}

impl ExecutorConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Runs one test case against one environment.
///
/// Implementations never fail: transport problems and malformed input
/// are reported through the returned result's status.
#[async_trait]
pub trait CaseExecutor: Send + Sync {
    async fn execute_case(
        &self,
        case: &TestCase,
        environment: &Environment,
        variables: &VariableScope,
    ) -> ExecutionResult;
}

/// Executor backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct DefaultCaseExecutor {
    client: Client,
    config: ExecutorConfig,
}

/// What came back over the wire.
struct Exchange {
    status: u16,
    headers: HashMap<String, String>,
    text: String,
    elapsed_ms: f64,
}

impl DefaultCaseExecutor {
    pub fn new(config: ExecutorConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    /// Use a prebuilt client. The client's own timeout applies; the
    /// config only labels timeout errors.
    pub fn with_client(client: Client, config: ExecutorConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn convert_method(method: HttpMethod) -> ReqMethod {
        match method {
            HttpMethod::Get => ReqMethod::GET,
            HttpMethod::Post => ReqMethod::POST,
            HttpMethod::Put => ReqMethod::PUT,
            HttpMethod::Delete => ReqMethod::DELETE,
            HttpMethod::Patch => ReqMethod::PATCH,
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> ExecutionError {
        if err.is_timeout() {
            ExecutionError::Timeout {
                timeout: self.config.timeout,
                source: err,
            }
        } else {
            ExecutionError::Transport(err)
        }
    }

    async fn send(
        &self,
        case: &TestCase,
        environment: &Environment,
        scope: &VariableScope,
    ) -> Result<Exchange, ExecutionError> {
        let url = build_url(&environment.base_url, &case.url, scope)?;
        info!("Full URL after variable replacement: {}", url);

        let mut headers = substitute_headers(&case.headers, scope);
        let body = build_body(case, scope, &mut headers)?;
        debug!("Request method: {}, Headers: {:?}", case.method, headers);

        let mut req_builder = self
            .client
            .request(Self::convert_method(case.method), url)
            .headers(to_header_map(&headers)?);
        if let Some(body) = body {
            req_builder = req_builder.body(body);
        }

        let started = Instant::now();
        let response = req_builder
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        debug!("Response status code: {}", status);
        debug!("Response headers: {:?}", headers);

        let text = response.text().await.map_err(|err| {
            if err.is_timeout() {
                self.transport_error(err)
            } else {
                ExecutionError::ReadBody(err)
            }
        })?;

        Ok(Exchange {
            status,
            headers,
            text,
            elapsed_ms: elapsed_ms(started),
        })
    }
}

#[async_trait]
impl CaseExecutor for DefaultCaseExecutor {
    #[instrument(
        skip_all,
        fields(case = %case.label(), method = %case.method, url = %case.url)
    )]
    async fn execute_case(
        &self,
        case: &TestCase,
        environment: &Environment,
        variables: &VariableScope,
    ) -> ExecutionResult {
        let start = Instant::now();
        let request_headers = case.headers.clone();
        let request_body = audit_body(case);

        info!(
            "Executing test case: {} with environment: {}",
            case.label(),
            environment.label()
        );
        info!(
            "Request method: {}, URL: {}, Body format: {:?}",
            case.method, case.url, case.body_format
        );

        let scope = effective_scope(variables, environment);
        if !scope.is_empty() {
            debug!("Using variables: {:?}", scope);
        }

        let exchange = match self.send(case, environment, &scope).await {
            Ok(exchange) => exchange,
            Err(err) => {
                error!("Error executing test case {}: {}", case.label(), err);
                return ExecutionResult::error(
                    request_headers,
                    request_body,
                    err.to_string(),
                    elapsed_ms(start),
                );
            }
        };

        let body = ParseOutcome::parse(&exchange.text).into_wrapped();
        let response = ResponseView {
            status: exchange.status,
            text: &exchange.text,
            body: &body,
        };

        let mut success = exchange.status == case.expected_status_code;
        if !success {
            debug!(
                "Status code mismatch: expected {}, got {}",
                case.expected_status_code, exchange.status
            );
        }

        let validation = validate(&case.validation_rules, &response, &scope);
        success &= validation.success;

        let extracted_params = extract(&case.extract_params, &body);

        let status = if success {
            CaseStatus::Passed
        } else {
            CaseStatus::Failed
        };
        info!(
            "Test case {} finished: {} ({:.1} ms)",
            case.label(),
            status,
            exchange.elapsed_ms
        );

        ExecutionResult {
            status,
            request_headers,
            request_body,
            response_status_code: Some(exchange.status),
            response_headers: exchange.headers,
            response_body: Some(body),
            response_time_ms: exchange.elapsed_ms,
            error_message: validation.errors.join("\n"),
            extracted_params,
            validators: validation.records,
        }
    }
}

/// Caller variables overlaid with the environment's; the environment
/// wins on conflicts.
pub fn effective_scope(
    variables: &VariableScope,
    environment: &Environment,
) -> VariableScope {
    let mut scope = variables.clone();
    scope.extend(
        environment
            .variables
            .iter()
            .map(|(name, value)| (name.clone(), value.clone())),
    );
    scope
}

/// Join the substituted path onto the base URL with exactly one `/`.
pub fn build_url(
    base_url: &str,
    path: &str,
    scope: &VariableScope,
) -> Result<Url, ExecutionError> {
    let path = substitute_str(path, scope);
    let joined = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined)
        .map_err(|source| ExecutionError::InvalidUrl { url: joined, source })
}

fn sends_body(case: &TestCase) -> Option<&Value> {
    if !case.method.sends_body() {
        return None;
    }
    case.body.as_ref().filter(|body| match body {
        Value::Null => false,
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64() != Some(0.0),
    })
}

/// The body as written in the case, kept for the audit trail.
fn audit_body(case: &TestCase) -> Option<Value> {
    sends_body(case).map(|body| ParseOutcome::from_value(body).into_value())
}

/// Substitute the body and encode it per the case's body format,
/// adding a default `Content-Type` when the case did not set one.
fn build_body(
    case: &TestCase,
    scope: &VariableScope,
    headers: &mut HashMap<String, String>,
) -> Result<Option<String>, ExecutionError> {
    let Some(raw) = sends_body(case) else {
        return Ok(None);
    };

    let body = match ParseOutcome::from_value(raw) {
        ParseOutcome::Json(json) => ParseOutcome::Json(substitute(&json, scope)),
        ParseOutcome::Text(text) => {
            ParseOutcome::Text(substitute_str(&text, scope))
        }
    };

    let payload = match case.body_format {
        BodyFormat::Json => {
            set_default_content_type(headers, JSON_CONTENT_TYPE);
            match body {
                ParseOutcome::Json(json) => serde_json::to_string(&json)
                    .map_err(|err| ExecutionError::Encode(err.to_string()))?,
                ParseOutcome::Text(text) => text,
            }
        }
        BodyFormat::FormData => {
            set_default_content_type(headers, FORM_CONTENT_TYPE);
            match body {
                ParseOutcome::Json(Value::Object(fields)) => encode_form(
                    fields.iter().map(|(name, value)| {
                        (name.clone(), value_to_string(value))
                    }),
                )?,
                ParseOutcome::Json(Value::Array(items)) => {
                    match form_pairs(&items) {
                        Some(pairs) => encode_form(pairs)?,
                        None => value_to_string(&Value::Array(items)),
                    }
                }
                ParseOutcome::Json(other) => value_to_string(&other),
                ParseOutcome::Text(text) => text,
            }
        }
    };

    debug!("Request body ({:?}): {}", case.body_format, payload);
    Ok(Some(payload))
}

fn set_default_content_type(
    headers: &mut HashMap<String, String>,
    content_type: &str,
) {
    let present = headers
        .keys()
        .any(|name| name.eq_ignore_ascii_case("content-type"));
    if !present {
        headers.insert("Content-Type".to_string(), content_type.to_string());
    }
}

fn encode_form(
    pairs: impl IntoIterator<Item = (String, String)>,
) -> Result<String, ExecutionError> {
    let pairs: Vec<(String, String)> = pairs.into_iter().collect();
    serde_urlencoded::to_string(&pairs)
        .map_err(|err| ExecutionError::Encode(err.to_string()))
}

/// Read `[[key, value], ...]` as ordered form pairs. Repeated keys are
/// kept. `None` unless every item is a two-element array.
fn form_pairs(items: &[Value]) -> Option<Vec<(String, String)>> {
    items
        .iter()
        .map(|item| match item.as_array().map(Vec::as_slice) {
            Some([key, value]) => {
                Some((value_to_string(key), value_to_string(value)))
            }
            _ => None,
        })
        .collect()
}

fn to_header_map(
    headers: &HashMap<String, String>,
) -> Result<HeaderMap, ExecutionError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                ExecutionError::InvalidHeader {
                    name: name.clone(),
                    reason: err.to_string(),
                }
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|err| {
            ExecutionError::InvalidHeader {
                name: name.clone(),
                reason: err.to_string(),
            }
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Flatten response headers, joining repeated names with `, `.
fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut collected: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let value = value.to_str().unwrap_or("");
        collected
            .entry(name.to_string())
            .and_modify(|joined| {
                joined.push_str(", ");
                joined.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    collected
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
