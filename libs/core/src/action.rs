use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::credential::Identity;
use crate::error::DispatchError;
use crate::token::Token;

/// Everything one outbound action call needs.
#[derive(Debug, Clone, Copy)]
pub struct ActionCall<'a> {
    pub identity: &'a Identity,
    pub token: &'a Token,
    pub target: &'a str,
}

/// Classified result of a single action call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Acknowledged,
    RateLimited { retry_after: Option<Duration> },
    AuthorizationRejected { status: u16, message: String },
    Transient { reason: String },
}

impl ActionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ActionOutcome::Acknowledged => "acknowledged",
            ActionOutcome::RateLimited { .. } => "rate_limited",
            ActionOutcome::AuthorizationRejected { .. } => "authorization_rejected",
            ActionOutcome::Transient { .. } => "transient",
        }
    }
}

/// Performs the repeated action against a remote service.
#[async_trait]
pub trait ActionClient: Send + Sync {
    async fn perform(&self, call: &ActionCall<'_>) -> ActionOutcome;
}

/// Code the remote uses for "temporarily blocked", either as the HTTP status
/// or as the JSON `error.code` of a 400 reply.
pub const TEMPORARILY_BLOCKED_CODE: i64 = 368;

/// Maps raw responses from the action endpoint onto [`ActionOutcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseClassifier {
    /// Codes meaning "temporarily blocked", matched against both the HTTP
    /// status and the JSON `error.code`.
    pub rate_limit_codes: Vec<i64>,
}

impl Default for ResponseClassifier {
    fn default() -> Self {
        Self::new(vec![TEMPORARILY_BLOCKED_CODE])
    }
}

impl ResponseClassifier {
    pub fn new(rate_limit_codes: Vec<i64>) -> Self {
        Self { rate_limit_codes }
    }

    /// ```
    /// use boost_core::{ActionOutcome, ResponseClassifier};
    ///
    /// let classifier = ResponseClassifier::default();
    /// assert_eq!(classifier.classify(200, None, r#"{"id":"1_2"}"#), ActionOutcome::Acknowledged);
    /// assert!(matches!(
    ///     classifier.classify(403, None, ""),
    ///     ActionOutcome::AuthorizationRejected { status: 403, .. }
    /// ));
    /// ```
    pub fn classify(&self, status: u16, retry_after: Option<&str>, body: &str) -> ActionOutcome {
        let error = error_payload(body);
        let error_code = error.as_ref().and_then(|e| e.code);
        let error_message = error.as_ref().and_then(|e| e.message.clone());

        if status == 429
            || self.rate_limit_codes.contains(&i64::from(status))
            || error_code.is_some_and(|code| self.rate_limit_codes.contains(&code))
        {
            return ActionOutcome::RateLimited {
                retry_after: retry_after.and_then(parse_retry_after),
            };
        }

        if matches!(status, 400 | 401 | 403) {
            return ActionOutcome::AuthorizationRejected {
                status,
                message: error_message.unwrap_or_else(|| format!("HTTP {status}")),
            };
        }

        if (200..300).contains(&status) {
            return match error {
                None => ActionOutcome::Acknowledged,
                Some(_) => ActionOutcome::Transient {
                    reason: format!(
                        "error payload in HTTP {status} response: {}",
                        error_message.unwrap_or_else(|| "unspecified".into())
                    ),
                },
            };
        }

        ActionOutcome::Transient {
            reason: match error_message {
                Some(message) => format!("HTTP {status}: {message}"),
                None => format!("HTTP {status}"),
            },
        }
    }
}

struct ErrorPayload {
    code: Option<i64>,
    message: Option<String>,
}

fn error_payload(body: &str) -> Option<ErrorPayload> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    if error.is_null() {
        return None;
    }
    Some(ErrorPayload {
        code: error.get("code").and_then(Value::as_i64),
        message: error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| error.as_str().map(str::to_string)),
    })
}

fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[derive(Debug, Clone)]
pub struct ActionEndpointConfig {
    pub url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub classifier: ResponseClassifier,
}

impl ActionEndpointConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_agent: concat!("boost/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(15),
            classifier: ResponseClassifier::default(),
        }
    }
}

/// Posts the target link and token to the action endpoint.
pub struct HttpActionClient {
    client: reqwest::Client,
    url: String,
    user_agent: String,
    classifier: ResponseClassifier,
}

impl HttpActionClient {
    pub fn new(config: ActionEndpointConfig) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| DispatchError::Internal(format!("build action client: {err}")))?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: ActionEndpointConfig) -> Self {
        Self {
            client,
            url: config.url,
            user_agent: config.user_agent,
            classifier: config.classifier,
        }
    }
}

#[async_trait]
impl ActionClient for HttpActionClient {
    async fn perform(&self, call: &ActionCall<'_>) -> ActionOutcome {
        let response = match self
            .client
            .post(&self.url)
            .query(&[("link", call.target), ("access_token", call.token.as_str())])
            .header(reqwest::header::COOKIE, call.identity.as_str())
            .header(reqwest::header::USER_AGENT, self.user_agent.as_str())
            .header(reqwest::header::ACCEPT, "*/*")
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let kind = if err.is_timeout() { "timeout" } else { "network" };
                // The request URL carries the token; keep it out of the reason.
                return ActionOutcome::Transient {
                    reason: format!("{kind} error: {}", err.without_url()),
                };
            }
        };

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                return ActionOutcome::Transient {
                    reason: format!("response body unreadable: {err}"),
                };
            }
        };

        let outcome = self
            .classifier
            .classify(status, retry_after.as_deref(), &body);
        debug!(status, outcome = outcome.label(), "action call completed");
        outcome
    }
}
