pub mod config;
pub mod http;
mod main_logic;
pub mod rate;

use std::sync::Arc;

use anyhow::Result;
use boost_core::{HttpActionClient, HttpTokenExtractor};
use boost_dispatch::Dispatcher;
use boost_history::HistoryLog;
use boost_session::shared_registry;

use crate::config::GatewayConfig;
pub use main_logic::run;

/// Wires the production token extractor and action client into a dispatcher.
pub fn build_dispatcher(config: &GatewayConfig) -> Result<Dispatcher> {
    let tokens = HttpTokenExtractor::new(config.token_probe.clone())?;
    let actions = HttpActionClient::new(config.action.clone())?;
    Ok(Dispatcher::new(
        shared_registry(),
        Arc::new(HistoryLog::new(config.history_capacity)),
        Arc::new(tokens),
        Arc::new(actions),
        config.dispatch.clone(),
    ))
}
