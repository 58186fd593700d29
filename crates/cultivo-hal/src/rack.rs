//! Default channel table for a single hydroponic rack (`rack0`).
//!
//! Sensors are published by the rack's sensor board under `rack0/sens/...`;
//! actuators listen under `rack0/actu/...`.  The supply pump and the
//! humidifier are switched on/off, everything else takes a 0–100 % duty.

use cultivo_types::{SyncError, ValueKind};

use crate::registry::TopicRegistry;

const PERCENT: ValueKind = ValueKind::Numeric { min: 0.0, max: 100.0 };

/// Build the `rack0` registry.
///
/// # Errors
///
/// Never fails in practice; the signature mirrors
/// [`RegistryBuilder::build`][crate::registry::RegistryBuilder::build].
pub fn rack0() -> Result<TopicRegistry, SyncError> {
    TopicRegistry::builder()
        // Sensors
        .sensor("water_temp", "rack0/sens/water/temperature", ValueKind::Numeric {
            min: -10.0,
            max: 60.0,
        })
        .sensor("ambient_temp", "rack0/sens/ambient/temperature", ValueKind::Numeric {
            min: -20.0,
            max: 70.0,
        })
        .sensor("ambient_humidity", "rack0/sens/ambient/humidity", PERCENT)
        .sensor("water_ph", "rack0/sens/water/ph", ValueKind::Numeric { min: 0.0, max: 14.0 })
        .sensor("water_tds", "rack0/sens/water/tds", ValueKind::Numeric {
            min: 0.0,
            max: 5_000.0,
        })
        .sensor("water_ec", "rack0/sens/water/ec", ValueKind::Numeric { min: 0.0, max: 20.0 })
        // Actuators
        .actuator("watering0", "rack0/actu/watering0", ValueKind::Boolean)
        .actuator("dose_pump0", "rack0/actu/dose_pump0", PERCENT)
        .actuator("dose_pump1", "rack0/actu/dose_pump1", PERCENT)
        .actuator("dose_pump2", "rack0/actu/dose_pump2", PERCENT)
        .actuator("light", "rack0/actu/light/control", PERCENT)
        .actuator("fan0", "rack0/actu/fan/control0", PERCENT)
        .actuator("fan1", "rack0/actu/fan/control1", PERCENT)
        .actuator("humidifier", "rack0/actu/humidifier", ValueKind::Boolean)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cultivo_types::Direction;

    #[test]
    fn rack0_has_six_sensors_and_eight_actuators() {
        let registry = rack0().unwrap();
        assert_eq!(registry.inbound().count(), 6);
        assert_eq!(registry.outbound().count(), 8);
        assert_eq!(registry.len(), 14);
    }

    #[test]
    fn rack0_topics_follow_direction_prefix() {
        let registry = rack0().unwrap();
        for channel in registry.all() {
            let prefix = match channel.direction {
                Direction::Inbound => "rack0/sens/",
                Direction::Outbound => "rack0/actu/",
            };
            assert!(
                channel.wire_topic.starts_with(prefix),
                "{} has unexpected topic {}",
                channel.name,
                channel.wire_topic
            );
        }
    }

    #[test]
    fn rack0_fan_is_percent() {
        let registry = rack0().unwrap();
        assert_eq!(registry.resolve("fan0").unwrap().kind, PERCENT);
    }
}
