//! Core types and outbound clients shared by the boost dispatch runtime.

pub mod action;
pub mod credential;
pub mod error;
pub mod token;
pub mod types;

pub use action::{
    ActionCall, ActionClient, ActionEndpointConfig, ActionOutcome, HttpActionClient,
    ResponseClassifier, TEMPORARILY_BLOCKED_CODE,
};
pub use credential::{CredentialPolicy, Identity, normalize_credential};
pub use error::DispatchError;
pub use token::{
    DEFAULT_TOKEN_PATTERN, HttpTokenExtractor, Token, TokenProbeConfig, TokenSource,
    extract_token,
};
pub use types::{DispatchRequest, Session, SessionStatus, SessionSummary};
