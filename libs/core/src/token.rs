use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use boost_telemetry::{TelemetryLabels, record_counter};
use regex::Regex;
use tracing::{debug, error, instrument, warn};

use crate::credential::Identity;
use crate::error::DispatchError;

const PROBE_ATTEMPTS_COUNTER: &str = "token_probe_attempts_total";
pub const DEFAULT_TOKEN_PATTERN: &str = r#""accessToken":"(.*?)""#;

/// Short-lived authorization string. Held for one dispatch run only.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

/// Source of authorization tokens for a normalised identity.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self, identity: &Identity) -> Result<Token, DispatchError>;
}

#[derive(Debug, Clone)]
pub struct TokenProbeConfig {
    pub probe_url: String,
    pub pattern: String,
    pub user_agent: String,
    pub max_attempts: u32,
    /// Delay before retry `n` is `retry_step * n`.
    pub retry_step: Duration,
    pub timeout: Duration,
}

impl TokenProbeConfig {
    pub fn new(probe_url: impl Into<String>) -> Self {
        Self {
            probe_url: probe_url.into(),
            pattern: DEFAULT_TOKEN_PATTERN.to_string(),
            user_agent: concat!("boost/", env!("CARGO_PKG_VERSION")).to_string(),
            max_attempts: 3,
            retry_step: Duration::from_secs(1),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Scrapes a token out of the page served at a fixed probe endpoint.
pub struct HttpTokenExtractor {
    client: reqwest::Client,
    probe_url: String,
    pattern: Regex,
    user_agent: String,
    max_attempts: u32,
    retry_step: Duration,
}

impl HttpTokenExtractor {
    pub fn new(config: TokenProbeConfig) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| DispatchError::Internal(format!("build probe client: {err}")))?;
        Self::with_client(client, config)
    }

    pub fn with_client(
        client: reqwest::Client,
        config: TokenProbeConfig,
    ) -> Result<Self, DispatchError> {
        let pattern = Regex::new(&config.pattern)
            .map_err(|err| DispatchError::Internal(format!("invalid token pattern: {err}")))?;
        if pattern.captures_len() < 2 {
            return Err(DispatchError::Internal(
                "token pattern must contain a capture group".into(),
            ));
        }
        Ok(Self {
            client,
            probe_url: config.probe_url,
            pattern,
            user_agent: config.user_agent,
            max_attempts: config.max_attempts.max(1),
            retry_step: config.retry_step,
        })
    }

    async fn probe_once(&self, identity: &Identity) -> Result<Token, String> {
        let response = self
            .client
            .get(&self.probe_url)
            .header(reqwest::header::COOKIE, identity.as_str())
            .header(reqwest::header::USER_AGENT, self.user_agent.as_str())
            .header(reqwest::header::ACCEPT, "text/html")
            .send()
            .await
            .map_err(|err| format!("probe request failed: {err}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("probe returned HTTP {}", status.as_u16()));
        }
        let body = response
            .text()
            .await
            .map_err(|err| format!("probe body unreadable: {err}"))?;
        extract_token(&self.pattern, &body).ok_or_else(|| "token pattern not found".to_string())
    }
}

#[async_trait]
impl TokenSource for HttpTokenExtractor {
    #[instrument(name = "token.fetch", skip(self, identity), fields(url = %self.probe_url))]
    async fn fetch(&self, identity: &Identity) -> Result<Token, DispatchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.probe_once(identity).await {
                Ok(token) => {
                    record_counter(
                        PROBE_ATTEMPTS_COUNTER,
                        1,
                        &TelemetryLabels::new("token").with_outcome("ok"),
                    );
                    debug!(attempt, "token extracted");
                    return Ok(token);
                }
                Err(reason) => {
                    record_counter(
                        PROBE_ATTEMPTS_COUNTER,
                        1,
                        &TelemetryLabels::new("token").with_outcome("failed"),
                    );
                    if attempt >= self.max_attempts {
                        error!(attempt, %reason, "token extraction failed");
                        return Err(DispatchError::TokenExtractionFailed {
                            attempts: attempt,
                            reason,
                        });
                    }
                    warn!(attempt, %reason, "retrying token probe");
                    tokio::time::sleep(self.retry_step * attempt).await;
                }
            }
        }
    }
}

/// Returns the first non-empty capture of `pattern` in `body`.
///
/// ```
/// use boost_core::extract_token;
/// use regex::Regex;
///
/// let pattern = Regex::new(r#""accessToken":"(.*?)""#).unwrap();
/// let token = extract_token(&pattern, r#"{"x":1,"accessToken":"EAAB123"}"#).unwrap();
/// assert_eq!(token.as_str(), "EAAB123");
/// ```
pub fn extract_token(pattern: &Regex, body: &str) -> Option<Token> {
    pattern
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|value| !value.is_empty())
        .map(Token::new)
}
