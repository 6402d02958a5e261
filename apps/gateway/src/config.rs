use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use boost_core::{
    ActionEndpointConfig, CredentialPolicy, DEFAULT_TOKEN_PATTERN, ResponseClassifier,
    TokenProbeConfig,
};
use boost_dispatch::DispatchConfig;
use boost_history::DEFAULT_HISTORY_CAPACITY;
use boost_pacing::{PacingPolicy, RetryLimits};
use tracing::warn;

const DEFAULT_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_USER_AGENT: &str = concat!("boost-gateway/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub addr: SocketAddr,
    pub token_probe: TokenProbeConfig,
    pub action: ActionEndpointConfig,
    pub dispatch: DispatchConfig,
    pub history_capacity: usize,
    pub submit_rate_cap: u32,
    pub submit_rate_refill: u32,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let addr_raw = env.string("GATEWAY_ADDR").unwrap_or_else(|| DEFAULT_ADDR.into());
        let addr = SocketAddr::from_str(&addr_raw)
            .with_context(|| format!("invalid GATEWAY_ADDR `{addr_raw}`"))?;

        let Some(probe_url) = env.string("TOKEN_PROBE_URL") else {
            bail!("TOKEN_PROBE_URL must be set");
        };
        let Some(action_url) = env.string("ACTION_URL") else {
            bail!("ACTION_URL must be set");
        };
        let user_agent = env
            .string("CLIENT_USER_AGENT")
            .unwrap_or_else(|| DEFAULT_USER_AGENT.into());

        let mut token_probe = TokenProbeConfig::new(probe_url);
        token_probe.pattern = env
            .string("TOKEN_PATTERN")
            .unwrap_or_else(|| DEFAULT_TOKEN_PATTERN.into());
        token_probe.user_agent = user_agent.clone();
        token_probe.max_attempts = env.parse("TOKEN_PROBE_ATTEMPTS", 3u32).max(1);
        token_probe.retry_step = Duration::from_millis(env.parse("TOKEN_PROBE_RETRY_MS", 1_000u64));

        let mut action = ActionEndpointConfig::new(action_url);
        action.user_agent = user_agent;
        action.timeout = Duration::from_secs(env.parse("ACTION_TIMEOUT_SECS", 15u64).max(1));
        if let Some(codes) = env.list("ACTION_RATE_LIMIT_CODES") {
            action.classifier = ResponseClassifier::new(codes);
        }

        let pacing = PacingPolicy {
            jitter_max: Duration::from_millis(env.parse("DISPATCH_JITTER_MS", 600u64)),
            rate_limit_factor: env.parse("DISPATCH_RATE_LIMIT_FACTOR", 3u32).max(1),
            transient_factor: env.parse("DISPATCH_TRANSIENT_FACTOR", 2u32).max(1),
        };
        let limits = RetryLimits {
            max_consecutive_transient: non_zero(env.parse("DISPATCH_MAX_TRANSIENT_RETRIES", 10u32)),
            max_consecutive_rate_limited: non_zero(
                env.parse("DISPATCH_MAX_RATE_LIMIT_RETRIES", 20u32),
            ),
            max_run_time: non_zero(env.parse("DISPATCH_MAX_RUN_SECS", 0u64))
                .map(Duration::from_secs),
        };
        let dispatch = DispatchConfig {
            credential_policy: CredentialPolicy::new(
                env.string("CREDENTIAL_REQUIRED_KEY")
                    .unwrap_or_else(|| CredentialPolicy::default().required_key),
            ),
            pacing,
            limits,
            max_requested: env.parse("DISPATCH_MAX_REQUESTED", 1_000u32).max(1),
        };

        Ok(Self {
            addr,
            token_probe,
            action,
            dispatch,
            history_capacity: env.parse("HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY),
            submit_rate_cap: env.parse("SUBMIT_RATE_CAP", 10u32).max(1),
            submit_rate_refill: env.parse("SUBMIT_RATE_REFILL", 1u32),
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + Copy + std::fmt::Display,
    {
        match self.string(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(key, value = %raw, default = %default, "invalid value, using default");
                default
            }),
        }
    }

    fn list(&self, key: &str) -> Option<Vec<i64>> {
        let raw = self.string(key)?;
        let codes = raw
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .filter_map(|item| match item.parse() {
                Ok(code) => Some(code),
                Err(_) => {
                    warn!(key, value = %item, "ignoring non-numeric code");
                    None
                }
            })
            .collect();
        Some(codes)
    }
}

fn non_zero<T: Default + PartialEq>(value: T) -> Option<T> {
    (value != T::default()).then_some(value)
}
