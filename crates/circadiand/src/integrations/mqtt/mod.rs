mod client;
mod discovery;
mod light;
// Private module - module_inception is intentional here
#[allow(clippy::module_inception)]
mod mqtt;
mod sensor;

use linkme::distributed_slice;
pub use mqtt::MqttIntegration;

use crate::engine;

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_mqtt(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let Some(mqtt_config) = &ctx.config.integrations.mqtt else {
        return Ok(None);
    };

    let transport = client::RumqttcTransport::connect(mqtt_config);
    Ok(Some(Box::new(MqttIntegration::new(transport, mqtt_config))))
}
