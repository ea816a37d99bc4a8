mod handle;
mod integration;
mod mode;
mod protocol;
mod transport;
mod valve;

use anyhow::Context;
use linkme::distributed_slice;
pub use integration::MerossIntegration;
pub use mode::HardwareVariant;

use crate::engine;

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_meross(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let meross_config = if let Some(c) = &ctx.config.integrations.meross {
        c
    } else {
        return Ok(None);
    };

    let transport = transport::MerossMqttTransport::new(meross_config)
        .context("Failed to create Meross cloud transport")?;
    Ok(Some(Box::new(MerossIntegration::new(
        transport,
        meross_config,
    ))))
}
