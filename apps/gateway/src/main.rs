use anyhow::Result;
use boost_gateway::config::GatewayConfig;
use boost_telemetry::install as init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry("boost-gateway")?;

    let config = GatewayConfig::from_env()?;
    boost_gateway::run(config).await
}
