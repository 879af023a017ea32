use std::sync::Arc;
use tracing::info;
use vdcgate_server::{init_logging, ApiServer, Device, Gateway, GatewayHandler, ServerConfig};

const GATEWAY_DSUID: &str = "8fe1c5a2b4d3500080000000000000c100";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;
    init_logging(&config)?;

    let gateway = Arc::new(Gateway::new(GATEWAY_DSUID, "vdcgate demo"));
    gateway.add_device(Device::new(
        "8fe1c5a2b4d3500080000000000001a200",
        "Living room",
        60.0,
    ));
    gateway.add_device(Device::new(
        "8fe1c5a2b4d3500080000000000001a300",
        "Kitchen",
        40.0,
    ));
    info!(
        dsuid = gateway.dsuid(),
        devices = gateway.device_count(),
        "Gateway ready"
    );

    let handler = Arc::new(GatewayHandler::new(gateway));
    ApiServer::new(config, handler).run().await
}
