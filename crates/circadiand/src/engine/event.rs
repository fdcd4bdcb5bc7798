use super::state::LightState;

/// Controller-level events.
///
/// Distinct from `FromIntegrationMessage` (transport-level). The engine
/// converts `FromIntegrationMessage` into `Event` at the boundary,
/// attaching the previously observed state so consumers can detect edges.
#[derive(Debug, Clone)]
pub enum Event {
    LightStateChanged {
        entity_id: String,
        previous: Option<LightState>,
        state: LightState,
    },
    SensorValueChanged {
        entity_id: String,
        value: f64,
    },
}
